use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use qa_ledger_core::{
    Canonical, Cycle, Entity, EntityId, EntityKind, Execution, ExecutionStatus, Item, NaturalKey,
    Project, Stored, User, Version,
};
use rusqlite::{params, Connection, ErrorCode, Transaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

mod partition;
mod records;

pub use partition::{partition_count, PartitionFailure, PartitionReport, PartitionSummary};
pub use records::Record;

const LATEST_SCHEMA_VERSION: i64 = 1;

/// Bound on select/insert rounds when concurrent writers race on one key.
const FIND_OR_CREATE_ATTEMPTS: usize = 3;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS project (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS version (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  project_id INTEGER NOT NULL,
  name TEXT NOT NULL,
  start_date TEXT,
  end_date TEXT,
  released INTEGER NOT NULL DEFAULT 0 CHECK (released IN (0, 1)),
  UNIQUE(project_id, name),
  FOREIGN KEY (project_id) REFERENCES project(id)
);

CREATE TABLE IF NOT EXISTS item (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  key TEXT NOT NULL UNIQUE,
  project_id INTEGER,
  name TEXT,
  description TEXT,
  priority TEXT,
  status TEXT,
  folder TEXT,
  FOREIGN KEY (project_id) REFERENCES project(id)
);

CREATE TABLE IF NOT EXISTS cycle (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  key TEXT NOT NULL UNIQUE,
  version_id INTEGER,
  name TEXT NOT NULL,
  start_date TEXT,
  end_date TEXT,
  FOREIGN KEY (version_id) REFERENCES version(id)
);

CREATE TABLE IF NOT EXISTS user (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  login TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS execution_status (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS execution (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  key TEXT NOT NULL UNIQUE,
  item_id INTEGER,
  cycle_id INTEGER,
  status_id INTEGER,
  executor_id INTEGER,
  created_at TEXT,
  executed_at TEXT,
  comment TEXT,
  FOREIGN KEY (item_id) REFERENCES item(id),
  FOREIGN KEY (cycle_id) REFERENCES cycle(id),
  FOREIGN KEY (status_id) REFERENCES execution_status(id),
  FOREIGN KEY (executor_id) REFERENCES user(id)
);

CREATE INDEX IF NOT EXISTS idx_version_project ON version(project_id);
CREATE INDEX IF NOT EXISTS idx_item_project ON item(project_id);
CREATE INDEX IF NOT EXISTS idx_cycle_version ON cycle(version_id);
CREATE INDEX IF NOT EXISTS idx_execution_cycle ON execution(cycle_id);
CREATE INDEX IF NOT EXISTS idx_execution_item ON execution(item_id);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sha256: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub schema_version: i64,
    pub exported_at: String,
    pub files: Vec<ExportFileDigest>,
}

impl SqliteStore {
    /// Open a SQLite-backed canonical store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
        }

        Ok(())
    }

    /// Return the row for `key`, allocating a key-only row when none exists.
    ///
    /// Safe under concurrent callers on separate connections: the unique
    /// constraint on the natural key lets exactly one insert win, and losers
    /// re-read the winner's row.
    ///
    /// # Errors
    /// Returns an error when the store fails for a reason other than a
    /// uniqueness or busy conflict, or when the key never converges.
    pub fn find_or_create(&self, key: &NaturalKey) -> Result<Entity> {
        match key {
            NaturalKey::Project { name } => {
                self.find_or_create_row(&Project { name: name.clone() }).map(Entity::Project)
            }
            NaturalKey::Version { project_id, name } => {
                self.find_or_create_row(&Version::named(*project_id, name)).map(Entity::Version)
            }
            NaturalKey::Item { key } => self.find_or_create_row(&Item::keyed(key)).map(Entity::Item),
            NaturalKey::Cycle { key } => {
                self.find_or_create_row(&Cycle::keyed(key)).map(Entity::Cycle)
            }
            NaturalKey::Execution { key } => {
                self.find_or_create_row(&Execution::keyed(key)).map(Entity::Execution)
            }
            NaturalKey::User { login } => {
                self.find_or_create_row(&User { login: login.clone() }).map(Entity::User)
            }
            NaturalKey::ExecutionStatus { name } => self
                .find_or_create_row(&ExecutionStatus { name: name.clone() })
                .map(Entity::ExecutionStatus),
        }
    }

    /// Typed form of [`SqliteStore::find_or_create`]; only the natural-key
    /// fields are read.
    ///
    /// # Errors
    /// See [`SqliteStore::find_or_create`].
    pub fn find_or_create_row<T: Record>(&self, keyed: &T) -> Result<Stored<T>> {
        let key = keyed.natural_key();
        for attempt in 1..=FIND_OR_CREATE_ATTEMPTS {
            if let Some(found) =
                T::select(&self.conn, keyed).with_context(|| format!("failed to read {key}"))?
            {
                return Ok(found);
            }

            match T::insert_key(&self.conn, keyed) {
                Ok(_) => {}
                Err(err) if is_write_conflict(&err) && attempt < FIND_OR_CREATE_ATTEMPTS => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to allocate {key}"));
                }
            }
        }

        T::select(&self.conn, keyed)
            .with_context(|| format!("failed to read {key}"))?
            .ok_or_else(|| {
                anyhow!("{key} did not converge after {FIND_OR_CREATE_ATTEMPTS} attempts")
            })
    }

    /// Look up a row by natural key without creating it.
    ///
    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn find(&self, key: &NaturalKey) -> Result<Option<Entity>> {
        let found = match key {
            NaturalKey::Project { name } => {
                self.get(&Project { name: name.clone() })?.map(Entity::Project)
            }
            NaturalKey::Version { project_id, name } => {
                self.get(&Version::named(*project_id, name))?.map(Entity::Version)
            }
            NaturalKey::Item { key } => self.get(&Item::keyed(key))?.map(Entity::Item),
            NaturalKey::Cycle { key } => self.get(&Cycle::keyed(key))?.map(Entity::Cycle),
            NaturalKey::Execution { key } => {
                self.get(&Execution::keyed(key))?.map(Entity::Execution)
            }
            NaturalKey::User { login } => {
                self.get(&User { login: login.clone() })?.map(Entity::User)
            }
            NaturalKey::ExecutionStatus { name } => {
                self.get(&ExecutionStatus { name: name.clone() })?.map(Entity::ExecutionStatus)
            }
        };
        Ok(found)
    }

    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn get<T: Record>(&self, keyed: &T) -> Result<Option<Stored<T>>> {
        T::select(&self.conn, keyed).with_context(|| format!("failed to read {}", keyed.natural_key()))
    }

    /// Write every business field of `value`, overwriting previous values.
    ///
    /// # Errors
    /// Returns an error when a mandatory reference is unset, a referenced row
    /// does not exist, or the write fails.
    pub fn merge<T: Record>(&self, value: &T) -> Result<Stored<T>> {
        merge_in(&self.conn, value)
    }

    /// Split `items` into partitions of `partition_size` and apply `op` to every
    /// item of a partition inside one transaction, starting at `start_partition`.
    ///
    /// A failing partition rolls back alone; earlier partitions stay committed
    /// and later ones are not attempted.
    ///
    /// # Errors
    /// Returns [`PartitionFailure`] naming the partition index and the natural
    /// key whose operation failed.
    pub fn run_partitioned<T, F>(
        &mut self,
        items: &[T],
        partition_size: usize,
        start_partition: usize,
        mut op: F,
    ) -> Result<PartitionReport, PartitionFailure>
    where
        T: Canonical,
        F: FnMut(&Transaction<'_>, &T) -> Result<()>,
    {
        let partition_size = partition_size.max(1);
        let total_partitions = partition_count(items.len(), partition_size);
        let mut committed = Vec::new();

        for (index, partition) in items.chunks(partition_size).enumerate().skip(start_partition) {
            let failure = |failing_key: Option<String>, cause: &anyhow::Error, committed: &[PartitionSummary]| {
                PartitionFailure {
                    index,
                    failing_key,
                    partition_size,
                    total_partitions,
                    committed: committed.to_vec(),
                    cause: format!("{cause:#}"),
                }
            };

            let tx = match self.conn.transaction().context("failed to start partition transaction") {
                Ok(tx) => tx,
                Err(err) => return Err(failure(None, &err, &committed)),
            };

            for item in partition {
                if let Err(err) = op(&tx, item) {
                    // Dropping the transaction rolls the partition back.
                    drop(tx);
                    return Err(failure(Some(item.natural_key().to_string()), &err, &committed));
                }
            }

            if let Err(err) = tx.commit().context("failed to commit partition transaction") {
                return Err(failure(None, &err, &committed));
            }

            committed.push(PartitionSummary {
                index,
                rows: partition.len(),
                first_key: partition.first().map(|item| item.natural_key().to_string()).unwrap_or_default(),
                last_key: partition.last().map(|item| item.natural_key().to_string()).unwrap_or_default(),
            });
        }

        Ok(PartitionReport { partition_size, total_partitions, committed })
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list<T: Record>(&self) -> Result<Vec<Stored<T>>> {
        let query = format!("SELECT {} FROM {} ORDER BY id ASC", T::COLUMNS, T::TABLE);
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([], T::from_row)?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row.with_context(|| format!("failed to decode {} row", T::TABLE))?);
        }
        Ok(values)
    }

    /// Executions committed for one cycle, in id order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_executions_for_cycle(&self, cycle_id: EntityId) -> Result<Vec<Stored<Execution>>> {
        let query =
            format!("SELECT {} FROM execution WHERE cycle_id = ?1 ORDER BY id ASC", Execution::COLUMNS);
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(params![cycle_id.0], Execution::from_row)?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row.context("failed to decode execution row")?);
        }
        Ok(values)
    }

    /// Row count per canonical table.
    ///
    /// # Errors
    /// Returns an error when a count query fails.
    pub fn counts(&self) -> Result<BTreeMap<EntityKind, i64>> {
        let mut counts = BTreeMap::new();
        for kind in EntityKind::ALL {
            let count = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", kind.as_str()), [], |row| {
                    row.get::<_, i64>(0)
                })
                .with_context(|| format!("failed to count {kind} rows"))?;
            counts.insert(kind, count);
        }
        Ok(counts)
    }

    /// Run quick-check, foreign-key-check, and schema status checks.
    ///
    /// # Errors
    /// Returns an error when any integrity keyed query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    /// Export every canonical table as deterministic NDJSON plus a digest manifest,
    /// for downstream reporting.
    ///
    /// # Errors
    /// Returns an error when export files cannot be created, written, or serialized.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

        let files = vec![
            self.export_table::<Project>(out_dir)?,
            self.export_table::<Version>(out_dir)?,
            self.export_table::<Item>(out_dir)?,
            self.export_table::<Cycle>(out_dir)?,
            self.export_table::<User>(out_dir)?,
            self.export_table::<ExecutionStatus>(out_dir)?,
            self.export_table::<Execution>(out_dir)?,
        ];

        let manifest =
            ExportManifest { schema_version: LATEST_SCHEMA_VERSION, exported_at: now_rfc3339()?, files };

        let manifest_path = out_dir.join("manifest.json");
        let manifest_json =
            serde_json::to_vec_pretty(&manifest).context("failed to serialize export manifest")?;
        fs::write(&manifest_path, manifest_json).with_context(|| {
            format!("failed to write export manifest {}", manifest_path.display())
        })?;

        Ok(manifest)
    }

    fn export_table<T: Record + Serialize>(&self, out_dir: &Path) -> Result<ExportFileDigest> {
        let file_name = format!("{}.ndjson", T::TABLE);
        let rows = self.list::<T>()?;
        let (sha256, records) = write_ndjson_file(&out_dir.join(&file_name), &rows)?;
        Ok(ExportFileDigest { path: file_name, sha256, records })
    }
}

/// Upsert `value` on any connection or open transaction and return the persisted row.
///
/// # Errors
/// Returns an error when a mandatory reference is unset, a referenced row does
/// not exist, or the write fails.
pub fn merge_in<T: Record>(conn: &Connection, value: &T) -> Result<Stored<T>> {
    let key = value.natural_key();
    if let Some(reference) = value.missing_reference() {
        return Err(anyhow!("{key} MUST reference a {reference} before it is merged"));
    }

    T::upsert(conn, value).with_context(|| format!("failed to merge {key}"))?;
    T::select(conn, value)
        .with_context(|| format!("failed to re-read {key}"))?
        .ok_or_else(|| anyhow!("{key} vanished after merge"))
}

fn is_write_conflict(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::ConstraintViolation | ErrorCode::DatabaseBusy)
    )
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn write_ndjson_file<T: Serialize>(path: &Path, values: &[T]) -> Result<(String, usize)> {
    let file = File::create(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();

    for value in values {
        let line = serde_json::to_string(value).context("failed to serialize NDJSON row")?;
        writer
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        writer
            .write_all(b"\n")
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    writer.flush().with_context(|| format!("failed to flush export file {}", path.display()))?;

    Ok((format!("{:x}", hasher.finalize()), values.len()))
}

#[cfg(test)]
mod tests;

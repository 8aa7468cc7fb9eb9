use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;

use qa_ledger_core::UNSET;
use ulid::Ulid;

use super::*;

fn temp_db_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("qa-ledger-{label}-{}.sqlite3", Ulid::new()))
}

fn remove_db(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = fs::remove_file(format!("{}{suffix}", path.display()));
    }
}

fn migrated_store(path: &Path) -> Result<SqliteStore> {
    let mut store = SqliteStore::open(path)?;
    store.migrate()?;
    Ok(store)
}

struct Refs {
    item: EntityId,
    cycle: EntityId,
    status: EntityId,
    executor: EntityId,
}

fn seed_refs(store: &SqliteStore) -> Result<Refs> {
    let project = store.merge(&Project { name: "QA".to_string() })?;
    let version = store.merge(&Version::named(project.id, "1.0"))?;
    let item = store.merge(&Item::keyed("QA-1"))?;
    let cycle = store.merge(&Cycle { version_id: Some(version.id), ..Cycle::keyed("RUN-1") })?;
    let status = store.merge(&ExecutionStatus { name: "Pass".to_string() })?;
    let executor = store.merge(&User { login: "jdoe".to_string() })?;
    Ok(Refs { item: item.id, cycle: cycle.id, status: status.id, executor: executor.id })
}

fn executions(refs: &Refs, count: usize) -> Vec<Execution> {
    (0..count)
        .map(|index| Execution {
            item_id: Some(refs.item),
            cycle_id: Some(refs.cycle),
            status_id: Some(refs.status),
            executor_id: Some(refs.executor),
            ..Execution::keyed(&format!("EX-{index:05}"))
        })
        .collect()
}

#[test]
fn migrate_is_idempotent_and_reports_clean_integrity() -> Result<()> {
    let path = temp_db_path("migrate");
    let mut store = SqliteStore::open(&path)?;

    let before = store.schema_status()?;
    assert_eq!(before.current_version, 0);
    assert_eq!(before.pending_versions, vec![1]);

    store.migrate()?;
    store.migrate()?;

    let report = store.integrity_check()?;
    assert!(report.quick_check_ok);
    assert!(report.foreign_key_violations.is_empty());
    assert_eq!(report.schema_status.current_version, LATEST_SCHEMA_VERSION);
    assert!(report.schema_status.pending_versions.is_empty());

    drop(store);
    remove_db(&path);
    Ok(())
}

#[test]
fn find_or_create_allocates_once_and_keeps_key_only_rows() -> Result<()> {
    let path = temp_db_path("find-or-create");
    let store = migrated_store(&path)?;

    let first = store.find_or_create(&NaturalKey::item("QA-7"))?;
    let second = store.find_or_create(&NaturalKey::item("QA-7"))?;
    assert_eq!(first.id(), second.id());
    assert_eq!(first.kind(), EntityKind::Item);

    let Entity::Item(item) = first else {
        return Err(anyhow!("expected an item row"));
    };
    assert_eq!(item.value, Item::keyed("QA-7"));
    assert_eq!(store.counts()?.get(&EntityKind::Item), Some(&1));

    drop(store);
    remove_db(&path);
    Ok(())
}

#[test]
fn sentinels_resolve_to_one_row_per_kind() -> Result<()> {
    let path = temp_db_path("sentinel");
    let store = migrated_store(&path)?;

    let user = store.find_or_create_row(&User::unset())?;
    let again = store.find_or_create(&NaturalKey::user(UNSET))?;
    assert_eq!(user.id, again.id());

    let project = store.find_or_create_row(&Project::unset())?;
    let version = store.find_or_create(&NaturalKey::version(project.id, UNSET))?;
    let version_again = store.find_or_create_row(&Version::named(project.id, UNSET))?;
    assert_eq!(version.id(), version_again.id);

    let counts = store.counts()?;
    assert_eq!(counts.get(&EntityKind::User), Some(&1));
    assert_eq!(counts.get(&EntityKind::Project), Some(&1));
    assert_eq!(counts.get(&EntityKind::Version), Some(&1));

    drop(store);
    remove_db(&path);
    Ok(())
}

#[test]
fn find_does_not_create() -> Result<()> {
    let path = temp_db_path("find");
    let store = migrated_store(&path)?;

    assert!(store.find(&NaturalKey::cycle("RUN-404"))?.is_none());
    assert_eq!(store.counts()?.get(&EntityKind::Cycle), Some(&0));

    drop(store);
    remove_db(&path);
    Ok(())
}

#[test]
fn merge_overwrites_business_fields_and_keeps_the_id() -> Result<()> {
    let path = temp_db_path("merge");
    let store = migrated_store(&path)?;

    let allocated = store.find_or_create_row(&Item::keyed("QA-1"))?;
    let merged = store.merge(&Item {
        name: Some("Login works".to_string()),
        folder: Some("Auth/".to_string()),
        ..Item::keyed("QA-1")
    })?;
    assert_eq!(merged.id, allocated.id);
    assert_eq!(merged.name.as_deref(), Some("Login works"));

    let renamed =
        store.merge(&Item { name: Some("Login still works".to_string()), ..Item::keyed("QA-1") })?;
    assert_eq!(renamed.id, allocated.id);
    assert_eq!(renamed.name.as_deref(), Some("Login still works"));
    assert_eq!(renamed.folder, None);

    let repeated =
        store.merge(&Item { name: Some("Login still works".to_string()), ..Item::keyed("QA-1") })?;
    assert_eq!(repeated, renamed);
    assert_eq!(store.list::<Item>()?.len(), 1);

    drop(store);
    remove_db(&path);
    Ok(())
}

#[test]
fn version_dates_survive_a_round_trip() -> Result<()> {
    let path = temp_db_path("version-dates");
    let store = migrated_store(&path)?;

    let project = store.merge(&Project { name: "QA".to_string() })?;
    let version = store.merge(&Version {
        start_date: Some(time::macros::date!(2024 - 01 - 15)),
        end_date: Some(time::macros::date!(2024 - 02 - 01)),
        released: true,
        ..Version::named(project.id, "2.0")
    })?;

    let fetched = store.get(&Version::named(project.id, "2.0"))?;
    assert_eq!(fetched, Some(version));

    drop(store);
    remove_db(&path);
    Ok(())
}

#[test]
fn execution_without_references_is_rejected() -> Result<()> {
    let path = temp_db_path("execution-refs");
    let store = migrated_store(&path)?;

    let err = match store.merge(&Execution::keyed("EX-1")) {
        Ok(_) => return Err(anyhow!("unreferenced execution must be rejected")),
        Err(err) => err,
    };
    assert!(err.to_string().contains("MUST reference a item"));

    let dangling = Execution {
        item_id: Some(EntityId(9_001)),
        cycle_id: Some(EntityId(9_002)),
        status_id: Some(EntityId(9_003)),
        executor_id: Some(EntityId(9_004)),
        ..Execution::keyed("EX-2")
    };
    assert!(store.merge(&dangling).is_err());
    assert_eq!(store.counts()?.get(&EntityKind::Execution), Some(&0));

    drop(store);
    remove_db(&path);
    Ok(())
}

#[test]
fn partitioned_writes_commit_every_partition() -> Result<()> {
    let path = temp_db_path("partition");
    let mut store = migrated_store(&path)?;
    let refs = seed_refs(&store)?;
    let batch = executions(&refs, 1_200);

    let report = store
        .run_partitioned(&batch, 500, 0, |tx, execution| merge_in(tx, execution).map(|_| ()))
        .map_err(|failure| anyhow!(failure))?;

    assert_eq!(report.total_partitions, 3);
    assert_eq!(report.committed.len(), 3);
    assert_eq!(report.committed[2].rows, 200);
    assert_eq!(report.committed[0].first_key, "execution:EX-00000");
    assert_eq!(report.committed_rows(), 1_200);
    assert_eq!(store.counts()?.get(&EntityKind::Execution), Some(&1_200));
    assert_eq!(store.list_executions_for_cycle(refs.cycle)?.len(), 1_200);

    drop(store);
    remove_db(&path);
    Ok(())
}

#[test]
fn failed_partition_rolls_back_alone_and_resumes() -> Result<()> {
    let path = temp_db_path("partition-failure");
    let mut store = migrated_store(&path)?;
    let refs = seed_refs(&store)?;
    let batch = executions(&refs, 1_200);

    let failure = match store.run_partitioned(&batch, 500, 0, |tx, execution| {
        if execution.key == "EX-00742" {
            return Err(anyhow!("upstream row rejected"));
        }
        merge_in(tx, execution).map(|_| ())
    }) {
        Ok(_) => return Err(anyhow!("second partition must fail")),
        Err(failure) => failure,
    };

    assert_eq!(failure.index, 1);
    assert_eq!(failure.failing_key.as_deref(), Some("execution:EX-00742"));
    assert_eq!(failure.committed.len(), 1);
    assert_eq!(failure.remaining_partitions(), 2);
    assert!(failure.cause.contains("upstream row rejected"));
    assert_eq!(store.counts()?.get(&EntityKind::Execution), Some(&500));

    let resumed = store
        .run_partitioned(&batch, 500, failure.index, |tx, execution| {
            merge_in(tx, execution).map(|_| ())
        })
        .map_err(|failure| anyhow!(failure))?;
    assert_eq!(resumed.committed.len(), 2);
    assert_eq!(resumed.committed[0].index, 1);
    assert_eq!(store.counts()?.get(&EntityKind::Execution), Some(&1_200));

    drop(store);
    remove_db(&path);
    Ok(())
}

#[test]
fn empty_batch_has_no_partitions() -> Result<()> {
    let path = temp_db_path("partition-empty");
    let mut store = migrated_store(&path)?;

    let report = store
        .run_partitioned::<Execution, _>(&[], 500, 0, |_, _| Ok(()))
        .map_err(|failure| anyhow!(failure))?;
    assert_eq!(report.total_partitions, 0);
    assert!(report.committed.is_empty());
    assert_eq!(partition_count(1_001, 500), 3);
    assert_eq!(partition_count(3, 0), 3);

    drop(store);
    remove_db(&path);
    Ok(())
}

#[test]
fn concurrent_find_or_create_converges_on_one_row() -> Result<()> {
    let path = temp_db_path("concurrent");
    drop(migrated_store(&path)?);

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let mut handles = Vec::new();
    for _ in 0..workers {
        let path = path.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || -> Result<Vec<EntityId>> {
            let store = SqliteStore::open(&path)?;
            barrier.wait();
            let mut ids = Vec::new();
            for login in ["jdoe", UNSET, "asmith"] {
                ids.push(store.find_or_create(&NaturalKey::user(login))?.id());
            }
            Ok(ids)
        }));
    }

    let mut seen = Vec::new();
    for handle in handles {
        let ids = handle.join().map_err(|_| anyhow!("worker panicked"))??;
        seen.push(ids);
    }
    assert!(seen.windows(2).all(|pair| pair[0] == pair[1]));

    let store = SqliteStore::open(&path)?;
    assert_eq!(store.counts()?.get(&EntityKind::User), Some(&3));

    drop(store);
    remove_db(&path);
    Ok(())
}

#[test]
fn export_snapshot_writes_one_file_per_table() -> Result<()> {
    let path = temp_db_path("export");
    let store = migrated_store(&path)?;
    seed_refs(&store)?;

    let out_dir = std::env::temp_dir().join(format!("qa-ledger-export-{}", Ulid::new()));
    let manifest = store.export_snapshot(&out_dir)?;

    assert_eq!(manifest.files.len(), EntityKind::ALL.len());
    let projects = manifest
        .files
        .iter()
        .find(|file| file.path == "project.ndjson")
        .ok_or_else(|| anyhow!("project export missing"))?;
    assert_eq!(projects.records, 1);
    assert_eq!(projects.sha256.len(), 64);
    assert!(out_dir.join("manifest.json").exists());

    let line = fs::read_to_string(out_dir.join("cycle.ndjson"))?;
    let value: serde_json::Value = serde_json::from_str(line.trim())?;
    assert_eq!(value["key"], "RUN-1");

    let _ = fs::remove_dir_all(&out_dir);
    drop(store);
    remove_db(&path);
    Ok(())
}

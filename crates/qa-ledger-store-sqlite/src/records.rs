use qa_ledger_core::{
    Canonical, Cycle, Entity, EntityId, Execution, ExecutionStatus, Item, Project, Stored, User,
    Version,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Row mapping and SQL for one canonical table.
///
/// `select` and `insert_key` only read the natural-key fields of the value;
/// `upsert` writes every business field and overwrites previous values.
pub trait Record: Canonical + Clone + Sized {
    const TABLE: &'static str;
    const COLUMNS: &'static str;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>>;

    fn select(conn: &Connection, keyed: &Self) -> rusqlite::Result<Option<Stored<Self>>>;

    fn insert_key(conn: &Connection, keyed: &Self) -> rusqlite::Result<usize>;

    fn upsert(conn: &Connection, value: &Self) -> rusqlite::Result<usize>;

    fn into_entity(stored: Stored<Self>) -> Entity;

    fn from_entity(entity: Entity) -> Option<Stored<Self>>;

    /// Name of a mandatory reference that is still unset, if any.
    fn missing_reference(&self) -> Option<&'static str> {
        None
    }
}

impl Record for Project {
    const TABLE: &'static str = "project";
    const COLUMNS: &'static str = "id, name";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
        Ok(Stored::new(EntityId(row.get(0)?), Self { name: row.get(1)? }))
    }

    fn select(conn: &Connection, keyed: &Self) -> rusqlite::Result<Option<Stored<Self>>> {
        conn.query_row(
            "SELECT id, name FROM project WHERE name = ?1",
            params![keyed.name],
            Self::from_row,
        )
        .optional()
    }

    fn insert_key(conn: &Connection, keyed: &Self) -> rusqlite::Result<usize> {
        conn.execute("INSERT INTO project(name) VALUES (?1)", params![keyed.name])
    }

    fn upsert(conn: &Connection, value: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO project(name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            params![value.name],
        )
    }

    fn into_entity(stored: Stored<Self>) -> Entity {
        Entity::Project(stored)
    }

    fn from_entity(entity: Entity) -> Option<Stored<Self>> {
        match entity {
            Entity::Project(stored) => Some(stored),
            _ => None,
        }
    }
}

impl Record for Version {
    const TABLE: &'static str = "version";
    const COLUMNS: &'static str = "id, project_id, name, start_date, end_date, released";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
        Ok(Stored::new(
            EntityId(row.get(0)?),
            Self {
                project_id: EntityId(row.get(1)?),
                name: row.get(2)?,
                start_date: date_column(row, 3)?,
                end_date: date_column(row, 4)?,
                released: row.get(5)?,
            },
        ))
    }

    fn select(conn: &Connection, keyed: &Self) -> rusqlite::Result<Option<Stored<Self>>> {
        conn.query_row(
            "SELECT id, project_id, name, start_date, end_date, released
             FROM version WHERE project_id = ?1 AND name = ?2",
            params![keyed.project_id.0, keyed.name],
            Self::from_row,
        )
        .optional()
    }

    fn insert_key(conn: &Connection, keyed: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO version(project_id, name) VALUES (?1, ?2)",
            params![keyed.project_id.0, keyed.name],
        )
    }

    fn upsert(conn: &Connection, value: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO version(project_id, name, start_date, end_date, released)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(project_id, name) DO UPDATE SET
               start_date = excluded.start_date,
               end_date = excluded.end_date,
               released = excluded.released",
            params![
                value.project_id.0,
                value.name,
                date_text(value.start_date)?,
                date_text(value.end_date)?,
                value.released,
            ],
        )
    }

    fn into_entity(stored: Stored<Self>) -> Entity {
        Entity::Version(stored)
    }

    fn from_entity(entity: Entity) -> Option<Stored<Self>> {
        match entity {
            Entity::Version(stored) => Some(stored),
            _ => None,
        }
    }
}

impl Record for Item {
    const TABLE: &'static str = "item";
    const COLUMNS: &'static str = "id, key, project_id, name, description, priority, status, folder";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
        Ok(Stored::new(
            EntityId(row.get(0)?),
            Self {
                key: row.get(1)?,
                project_id: row.get::<_, Option<i64>>(2)?.map(EntityId),
                name: row.get(3)?,
                description: row.get(4)?,
                priority: row.get(5)?,
                status: row.get(6)?,
                folder: row.get(7)?,
            },
        ))
    }

    fn select(conn: &Connection, keyed: &Self) -> rusqlite::Result<Option<Stored<Self>>> {
        conn.query_row(
            "SELECT id, key, project_id, name, description, priority, status, folder
             FROM item WHERE key = ?1",
            params![keyed.key],
            Self::from_row,
        )
        .optional()
    }

    fn insert_key(conn: &Connection, keyed: &Self) -> rusqlite::Result<usize> {
        conn.execute("INSERT INTO item(key) VALUES (?1)", params![keyed.key])
    }

    fn upsert(conn: &Connection, value: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO item(key, project_id, name, description, priority, status, folder)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(key) DO UPDATE SET
               project_id = excluded.project_id,
               name = excluded.name,
               description = excluded.description,
               priority = excluded.priority,
               status = excluded.status,
               folder = excluded.folder",
            params![
                value.key,
                value.project_id.map(|id| id.0),
                value.name,
                value.description,
                value.priority,
                value.status,
                value.folder,
            ],
        )
    }

    fn into_entity(stored: Stored<Self>) -> Entity {
        Entity::Item(stored)
    }

    fn from_entity(entity: Entity) -> Option<Stored<Self>> {
        match entity {
            Entity::Item(stored) => Some(stored),
            _ => None,
        }
    }
}

impl Record for Cycle {
    const TABLE: &'static str = "cycle";
    const COLUMNS: &'static str = "id, key, version_id, name, start_date, end_date";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
        Ok(Stored::new(
            EntityId(row.get(0)?),
            Self {
                key: row.get(1)?,
                version_id: row.get::<_, Option<i64>>(2)?.map(EntityId),
                name: row.get(3)?,
                start_date: date_column(row, 4)?,
                end_date: date_column(row, 5)?,
            },
        ))
    }

    fn select(conn: &Connection, keyed: &Self) -> rusqlite::Result<Option<Stored<Self>>> {
        conn.query_row(
            "SELECT id, key, version_id, name, start_date, end_date FROM cycle WHERE key = ?1",
            params![keyed.key],
            Self::from_row,
        )
        .optional()
    }

    fn insert_key(conn: &Connection, keyed: &Self) -> rusqlite::Result<usize> {
        conn.execute("INSERT INTO cycle(key, name) VALUES (?1, ?1)", params![keyed.key])
    }

    fn upsert(conn: &Connection, value: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO cycle(key, version_id, name, start_date, end_date)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
               version_id = excluded.version_id,
               name = excluded.name,
               start_date = excluded.start_date,
               end_date = excluded.end_date",
            params![
                value.key,
                value.version_id.map(|id| id.0),
                value.name,
                date_text(value.start_date)?,
                date_text(value.end_date)?,
            ],
        )
    }

    fn into_entity(stored: Stored<Self>) -> Entity {
        Entity::Cycle(stored)
    }

    fn from_entity(entity: Entity) -> Option<Stored<Self>> {
        match entity {
            Entity::Cycle(stored) => Some(stored),
            _ => None,
        }
    }

    fn missing_reference(&self) -> Option<&'static str> {
        self.version_id.is_none().then_some("version")
    }
}

impl Record for Execution {
    const TABLE: &'static str = "execution";
    const COLUMNS: &'static str =
        "id, key, item_id, cycle_id, status_id, executor_id, created_at, executed_at, comment";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
        Ok(Stored::new(
            EntityId(row.get(0)?),
            Self {
                key: row.get(1)?,
                item_id: row.get::<_, Option<i64>>(2)?.map(EntityId),
                cycle_id: row.get::<_, Option<i64>>(3)?.map(EntityId),
                status_id: row.get::<_, Option<i64>>(4)?.map(EntityId),
                executor_id: row.get::<_, Option<i64>>(5)?.map(EntityId),
                created_at: timestamp_column(row, 6)?,
                executed_at: timestamp_column(row, 7)?,
                comment: row.get(8)?,
            },
        ))
    }

    fn select(conn: &Connection, keyed: &Self) -> rusqlite::Result<Option<Stored<Self>>> {
        conn.query_row(
            "SELECT id, key, item_id, cycle_id, status_id, executor_id, created_at, executed_at, comment
             FROM execution WHERE key = ?1",
            params![keyed.key],
            Self::from_row,
        )
        .optional()
    }

    fn insert_key(conn: &Connection, keyed: &Self) -> rusqlite::Result<usize> {
        conn.execute("INSERT INTO execution(key) VALUES (?1)", params![keyed.key])
    }

    fn upsert(conn: &Connection, value: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO execution(
                key, item_id, cycle_id, status_id, executor_id, created_at, executed_at, comment
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(key) DO UPDATE SET
               item_id = excluded.item_id,
               cycle_id = excluded.cycle_id,
               status_id = excluded.status_id,
               executor_id = excluded.executor_id,
               created_at = excluded.created_at,
               executed_at = excluded.executed_at,
               comment = excluded.comment",
            params![
                value.key,
                value.item_id.map(|id| id.0),
                value.cycle_id.map(|id| id.0),
                value.status_id.map(|id| id.0),
                value.executor_id.map(|id| id.0),
                timestamp_text(value.created_at)?,
                timestamp_text(value.executed_at)?,
                value.comment,
            ],
        )
    }

    fn into_entity(stored: Stored<Self>) -> Entity {
        Entity::Execution(stored)
    }

    fn from_entity(entity: Entity) -> Option<Stored<Self>> {
        match entity {
            Entity::Execution(stored) => Some(stored),
            _ => None,
        }
    }

    fn missing_reference(&self) -> Option<&'static str> {
        if self.item_id.is_none() {
            Some("item")
        } else if self.cycle_id.is_none() {
            Some("cycle")
        } else if self.status_id.is_none() {
            Some("execution_status")
        } else if self.executor_id.is_none() {
            Some("user")
        } else {
            None
        }
    }
}

impl Record for User {
    const TABLE: &'static str = "user";
    const COLUMNS: &'static str = "id, login";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
        Ok(Stored::new(EntityId(row.get(0)?), Self { login: row.get(1)? }))
    }

    fn select(conn: &Connection, keyed: &Self) -> rusqlite::Result<Option<Stored<Self>>> {
        conn.query_row(
            "SELECT id, login FROM user WHERE login = ?1",
            params![keyed.login],
            Self::from_row,
        )
        .optional()
    }

    fn insert_key(conn: &Connection, keyed: &Self) -> rusqlite::Result<usize> {
        conn.execute("INSERT INTO user(login) VALUES (?1)", params![keyed.login])
    }

    fn upsert(conn: &Connection, value: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO user(login) VALUES (?1) ON CONFLICT(login) DO NOTHING",
            params![value.login],
        )
    }

    fn into_entity(stored: Stored<Self>) -> Entity {
        Entity::User(stored)
    }

    fn from_entity(entity: Entity) -> Option<Stored<Self>> {
        match entity {
            Entity::User(stored) => Some(stored),
            _ => None,
        }
    }
}

impl Record for ExecutionStatus {
    const TABLE: &'static str = "execution_status";
    const COLUMNS: &'static str = "id, name";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Stored<Self>> {
        Ok(Stored::new(EntityId(row.get(0)?), Self { name: row.get(1)? }))
    }

    fn select(conn: &Connection, keyed: &Self) -> rusqlite::Result<Option<Stored<Self>>> {
        conn.query_row(
            "SELECT id, name FROM execution_status WHERE name = ?1",
            params![keyed.name],
            Self::from_row,
        )
        .optional()
    }

    fn insert_key(conn: &Connection, keyed: &Self) -> rusqlite::Result<usize> {
        conn.execute("INSERT INTO execution_status(name) VALUES (?1)", params![keyed.name])
    }

    fn upsert(conn: &Connection, value: &Self) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO execution_status(name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            params![value.name],
        )
    }

    fn into_entity(stored: Stored<Self>) -> Entity {
        Entity::ExecutionStatus(stored)
    }

    fn from_entity(entity: Entity) -> Option<Stored<Self>> {
        match entity {
            Entity::ExecutionStatus(stored) => Some(stored),
            _ => None,
        }
    }
}

fn date_text(value: Option<Date>) -> rusqlite::Result<Option<String>> {
    value
        .map(|date| date.format(format_description!("[year]-[month]-[day]")))
        .transpose()
        .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

fn timestamp_text(value: Option<OffsetDateTime>) -> rusqlite::Result<Option<String>> {
    value
        .map(|timestamp| timestamp.format(&Rfc3339))
        .transpose()
        .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

fn date_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<Date>> {
    let Some(raw) = row.get::<_, Option<String>>(index)? else {
        return Ok(None);
    };
    Date::parse(&raw, format_description!("[year]-[month]-[day]"))
        .map(Some)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    let Some(raw) = row.get::<_, Option<String>>(index)? else {
        return Ok(None);
    };
    OffsetDateTime::parse(&raw, &Rfc3339)
        .map(Some)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

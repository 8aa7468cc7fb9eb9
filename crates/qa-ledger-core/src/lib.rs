use std::fmt::{Display, Formatter};
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use ulid::Ulid;

pub mod config;
pub mod source;
pub mod translate;

pub use config::{ConfigError, RetryConfig, SyncConfig, DEFAULT_PARTITION_SIZE};
pub use source::{SourceExecution, SourceSystem, SourceTestCase, SourceTestRun};
pub use translate::{ExecutionDeps, TranslateError};

/// Natural key shared by every sentinel row ("unknown/unset").
pub const UNSET: &str = "UNSET";

/// Separator appended to folder paths before they prefix a cycle name.
pub const FOLDER_SEPARATOR: char = '/';

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EntityId(pub i64);

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RunId(pub Ulid);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Version,
    Item,
    Cycle,
    Execution,
    User,
    ExecutionStatus,
}

impl EntityKind {
    /// Every kind in dependency order: a kind never references a later one.
    pub const ALL: [Self; 7] = [
        Self::Project,
        Self::Version,
        Self::Item,
        Self::Cycle,
        Self::User,
        Self::ExecutionStatus,
        Self::Execution,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Version => "version",
            Self::Item => "item",
            Self::Cycle => "cycle",
            Self::Execution => "execution",
            Self::User => "user",
            Self::ExecutionStatus => "execution_status",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "project" => Some(Self::Project),
            "version" => Some(Self::Version),
            "item" => Some(Self::Item),
            "cycle" => Some(Self::Cycle),
            "execution" => Some(Self::Execution),
            "user" => Some(Self::User),
            "execution_status" => Some(Self::ExecutionStatus),
            _ => None,
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable upstream identity of a canonical row.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NaturalKey {
    Project { name: String },
    Version { project_id: EntityId, name: String },
    Item { key: String },
    Cycle { key: String },
    Execution { key: String },
    User { login: String },
    ExecutionStatus { name: String },
}

impl NaturalKey {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Project { .. } => EntityKind::Project,
            Self::Version { .. } => EntityKind::Version,
            Self::Item { .. } => EntityKind::Item,
            Self::Cycle { .. } => EntityKind::Cycle,
            Self::Execution { .. } => EntityKind::Execution,
            Self::User { .. } => EntityKind::User,
            Self::ExecutionStatus { .. } => EntityKind::ExecutionStatus,
        }
    }

    #[must_use]
    pub fn project(name: &str) -> Self {
        Self::Project { name: name.to_string() }
    }

    #[must_use]
    pub fn version(project_id: EntityId, name: &str) -> Self {
        Self::Version { project_id, name: name.to_string() }
    }

    #[must_use]
    pub fn item(key: &str) -> Self {
        Self::Item { key: key.to_string() }
    }

    #[must_use]
    pub fn cycle(key: &str) -> Self {
        Self::Cycle { key: key.to_string() }
    }

    #[must_use]
    pub fn execution(key: &str) -> Self {
        Self::Execution { key: key.to_string() }
    }

    #[must_use]
    pub fn user(login: &str) -> Self {
        Self::User { login: login.to_string() }
    }

    #[must_use]
    pub fn execution_status(name: &str) -> Self {
        Self::ExecutionStatus { name: name.to_string() }
    }
}

impl Display for NaturalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project { name } => write!(f, "project:{name}"),
            Self::Version { project_id, name } => write!(f, "version:{project_id}/{name}"),
            Self::Item { key } => write!(f, "item:{key}"),
            Self::Cycle { key } => write!(f, "cycle:{key}"),
            Self::Execution { key } => write!(f, "execution:{key}"),
            Self::User { login } => write!(f, "user:{login}"),
            Self::ExecutionStatus { name } => write!(f, "execution_status:{name}"),
        }
    }
}

/// Implemented by every canonical entity so stores and caches can address it
/// by its natural key without knowing the concrete kind.
pub trait Canonical {
    const KIND: EntityKind;

    fn natural_key(&self) -> NaturalKey;
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Project {
    pub name: String,
}

impl Project {
    #[must_use]
    pub fn unset() -> Self {
        Self { name: UNSET.to_string() }
    }
}

impl Canonical for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::project(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Version {
    pub project_id: EntityId,
    pub name: String,
    pub start_date: Option<Date>,
    pub end_date: Option<Date>,
    pub released: bool,
}

impl Version {
    /// Key-only version, as allocated by `find_or_create`.
    #[must_use]
    pub fn named(project_id: EntityId, name: &str) -> Self {
        Self { project_id, name: name.to_string(), start_date: None, end_date: None, released: false }
    }
}

impl Canonical for Version {
    const KIND: EntityKind = EntityKind::Version;

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::version(self.project_id, &self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Item {
    pub key: String,
    pub project_id: Option<EntityId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub folder: Option<String>,
}

impl Item {
    #[must_use]
    pub fn keyed(key: &str) -> Self {
        Self {
            key: key.to_string(),
            project_id: None,
            name: None,
            description: None,
            priority: None,
            status: None,
            folder: None,
        }
    }
}

impl Canonical for Item {
    const KIND: EntityKind = EntityKind::Item;

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::item(&self.key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Cycle {
    pub key: String,
    pub version_id: Option<EntityId>,
    pub name: String,
    pub start_date: Option<Date>,
    pub end_date: Option<Date>,
}

impl Cycle {
    #[must_use]
    pub fn keyed(key: &str) -> Self {
        Self { key: key.to_string(), version_id: None, name: key.to_string(), start_date: None, end_date: None }
    }
}

impl Canonical for Cycle {
    const KIND: EntityKind = EntityKind::Cycle;

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::cycle(&self.key)
    }
}

/// A single test execution. Every reference is mandatory once translated;
/// `find_or_create` is the only path that leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Execution {
    pub key: String,
    pub item_id: Option<EntityId>,
    pub cycle_id: Option<EntityId>,
    pub status_id: Option<EntityId>,
    pub executor_id: Option<EntityId>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub executed_at: Option<OffsetDateTime>,
    pub comment: Option<String>,
}

impl Execution {
    #[must_use]
    pub fn keyed(key: &str) -> Self {
        Self {
            key: key.to_string(),
            item_id: None,
            cycle_id: None,
            status_id: None,
            executor_id: None,
            created_at: None,
            executed_at: None,
            comment: None,
        }
    }
}

impl Canonical for Execution {
    const KIND: EntityKind = EntityKind::Execution;

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::execution(&self.key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct User {
    pub login: String,
}

impl User {
    #[must_use]
    pub fn unset() -> Self {
        Self { login: UNSET.to_string() }
    }
}

impl Canonical for User {
    const KIND: EntityKind = EntityKind::User;

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::user(&self.login)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ExecutionStatus {
    pub name: String,
}

impl ExecutionStatus {
    #[must_use]
    pub fn unset() -> Self {
        Self { name: UNSET.to_string() }
    }
}

impl Canonical for ExecutionStatus {
    const KIND: EntityKind = EntityKind::ExecutionStatus;

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::execution_status(&self.name)
    }
}

/// A canonical entity together with the id the store assigned to it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Stored<T> {
    pub id: EntityId,
    #[serde(flatten)]
    pub value: T,
}

impl<T> Stored<T> {
    #[must_use]
    pub fn new(id: EntityId, value: T) -> Self {
        Self { id, value }
    }
}

impl<T> Deref for Stored<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// Any persisted canonical entity, used where one value must cover every kind.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Project(Stored<Project>),
    Version(Stored<Version>),
    Item(Stored<Item>),
    Cycle(Stored<Cycle>),
    Execution(Stored<Execution>),
    User(Stored<User>),
    ExecutionStatus(Stored<ExecutionStatus>),
}

impl Entity {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Project(_) => EntityKind::Project,
            Self::Version(_) => EntityKind::Version,
            Self::Item(_) => EntityKind::Item,
            Self::Cycle(_) => EntityKind::Cycle,
            Self::Execution(_) => EntityKind::Execution,
            Self::User(_) => EntityKind::User,
            Self::ExecutionStatus(_) => EntityKind::ExecutionStatus,
        }
    }

    #[must_use]
    pub fn id(&self) -> EntityId {
        match self {
            Self::Project(stored) => stored.id,
            Self::Version(stored) => stored.id,
            Self::Item(stored) => stored.id,
            Self::Cycle(stored) => stored.id,
            Self::Execution(stored) => stored.id,
            Self::User(stored) => stored.id,
            Self::ExecutionStatus(stored) => stored.id,
        }
    }

    #[must_use]
    pub fn natural_key(&self) -> NaturalKey {
        match self {
            Self::Project(stored) => stored.natural_key(),
            Self::Version(stored) => stored.natural_key(),
            Self::Item(stored) => stored.natural_key(),
            Self::Cycle(stored) => stored.natural_key(),
            Self::Execution(stored) => stored.natural_key(),
            Self::User(stored) => stored.natural_key(),
            Self::ExecutionStatus(stored) => stored.natural_key(),
        }
    }
}

/// Explicit outcome of an upstream lookup: absent records are a value, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "lookup", content = "entity", rename_all = "snake_case")]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    #[must_use]
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }

    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Found(value),
            None => Self::NotFound,
        }
    }
}

/// Trim a folder path and make it end in exactly one separator.
/// Blank folders contribute no prefix.
#[must_use]
pub fn normalize_folder(folder: Option<&str>) -> String {
    let Some(trimmed) = folder.map(str::trim).filter(|value| !value.is_empty()) else {
        return String::new();
    };

    if trimmed.ends_with(FOLDER_SEPARATOR) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{FOLDER_SEPARATOR}")
    }
}

/// Display name of a cycle: normalized folder prefix followed by the raw name.
#[must_use]
pub fn cycle_display_name(folder: Option<&str>, name: &str) -> String {
    format!("{}{}", normalize_folder(folder), name)
}

/// Substitute the sentinel key for absent or blank optional references.
#[must_use]
pub fn or_unset(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
        _ => UNSET.to_string(),
    }
}

//! Pure mappings from source records to canonical entities.
//!
//! Translators never perform I/O. Every dependency arrives already resolved,
//! and translating the same record with the same dependencies always yields
//! the same entity.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::source::{jira, scale, zapi, SourceExecution, SourceTestCase, SourceTestRun};
use crate::{
    cycle_display_name, or_unset, Cycle, Execution, ExecutionStatus, Item, Project, Stored, User,
    Version,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TranslateError {
    #[error("missing mandatory {record} record: `{field}` is absent or blank")]
    MissingRecord { record: &'static str, field: &'static str },
    #[error("invalid `{field}` on {record} {key}: {value:?}")]
    InvalidField { record: &'static str, key: String, field: &'static str, value: String },
}

/// Dependencies an execution references, resolved before translation.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionDeps<'a> {
    pub item: &'a Stored<Item>,
    pub cycle: &'a Stored<Cycle>,
    pub status: &'a Stored<ExecutionStatus>,
    pub executor: &'a Stored<User>,
}

/// Absent projects and blank names both map to the `UNSET` project.
#[must_use]
pub fn project_from_jira(project: Option<&jira::Project>) -> Project {
    Project { name: or_unset(project.and_then(|project| project.name.as_deref())) }
}

/// # Errors
/// Returns [`TranslateError::MissingRecord`] when the version has no name.
pub fn version_from_jira(
    version: &jira::Version,
    project: &Stored<Project>,
) -> Result<Version, TranslateError> {
    let name = required(version.name.as_deref(), "version", "name")?;
    Ok(Version {
        project_id: project.id,
        start_date: parse_date("version", &name, "startDate", version.start_date.as_deref())?,
        end_date: parse_date("version", &name, "releaseDate", version.release_date.as_deref())?,
        released: version.released.unwrap_or(false),
        name,
    })
}

/// # Errors
/// Returns [`TranslateError::MissingRecord`] when the issue has no key.
pub fn item_from_jira_issue(
    issue: &jira::Issue,
    project: &Stored<Project>,
) -> Result<Item, TranslateError> {
    let key = required(issue.key.as_deref(), "test case", "key")?;
    Ok(Item {
        key,
        project_id: Some(project.id),
        name: optional_text(issue.summary.as_deref()),
        description: optional_text(issue.description.as_deref()),
        priority: optional_text(issue.priority.as_deref()),
        status: optional_text(issue.status.as_deref()),
        folder: None,
    })
}

/// # Errors
/// Returns [`TranslateError::MissingRecord`] when the test case has no key.
pub fn item_from_scale(
    case: &scale::TestCase,
    project: &Stored<Project>,
) -> Result<Item, TranslateError> {
    let key = required(case.key.as_deref(), "test case", "key")?;
    Ok(Item {
        key,
        project_id: Some(project.id),
        name: optional_text(case.name.as_deref()),
        description: optional_text(case.objective.as_deref()),
        priority: optional_text(case.priority.as_deref()),
        status: optional_text(case.status.as_deref()),
        folder: optional_text(case.folder.as_deref()),
    })
}

/// # Errors
/// Propagates the system-specific translator's error.
pub fn translate_item(
    case: &SourceTestCase,
    project: &Stored<Project>,
) -> Result<Item, TranslateError> {
    match case {
        SourceTestCase::Jira(issue) => item_from_jira_issue(issue, project),
        SourceTestCase::Scale(case) => item_from_scale(case, project),
    }
}

/// # Errors
/// Returns [`TranslateError::MissingRecord`] when the run has no key, or
/// [`TranslateError::InvalidField`] for unparseable planned dates.
pub fn cycle_from_scale(
    run: &scale::TestRun,
    version: &Stored<Version>,
) -> Result<Cycle, TranslateError> {
    let key = required(run.key.as_deref(), "test run", "key")?;
    let raw_name = optional_text(run.name.as_deref()).unwrap_or_else(|| key.clone());
    Ok(Cycle {
        name: cycle_display_name(run.folder.as_deref(), &raw_name),
        version_id: Some(version.id),
        start_date: parse_date("test run", &key, "plannedStartDate", run.planned_start_date.as_deref())?,
        end_date: parse_date("test run", &key, "plannedEndDate", run.planned_end_date.as_deref())?,
        key,
    })
}

/// # Errors
/// Returns [`TranslateError::MissingRecord`] when the cycle has no id, or
/// [`TranslateError::InvalidField`] for unparseable dates.
pub fn cycle_from_zapi(
    cycle: &zapi::Cycle,
    version: &Stored<Version>,
) -> Result<Cycle, TranslateError> {
    let Some(id) = cycle.id else {
        return Err(TranslateError::MissingRecord { record: "test run", field: "id" });
    };
    let key = id.to_string();
    let raw_name = optional_text(cycle.name.as_deref()).unwrap_or_else(|| key.clone());
    Ok(Cycle {
        name: cycle_display_name(cycle.folder.as_deref(), &raw_name),
        version_id: Some(version.id),
        start_date: parse_date("test run", &key, "startDate", cycle.start_date.as_deref())?,
        end_date: parse_date("test run", &key, "endDate", cycle.end_date.as_deref())?,
        key,
    })
}

/// # Errors
/// Propagates the system-specific translator's error.
pub fn translate_cycle(
    run: &SourceTestRun,
    version: &Stored<Version>,
) -> Result<Cycle, TranslateError> {
    match run {
        SourceTestRun::Scale(run) => cycle_from_scale(run, version),
        SourceTestRun::Zapi(cycle) => cycle_from_zapi(cycle, version),
    }
}

#[must_use]
pub fn user_from_login(login: Option<&str>) -> User {
    User { login: or_unset(login) }
}

#[must_use]
pub fn status_from_name(name: Option<&str>) -> ExecutionStatus {
    ExecutionStatus { name: or_unset(name) }
}

/// # Errors
/// Returns [`TranslateError::MissingRecord`] when the result has no id, or
/// [`TranslateError::InvalidField`] for unparseable timestamps.
pub fn execution_from_scale(
    result: &scale::TestResult,
    deps: ExecutionDeps<'_>,
) -> Result<Execution, TranslateError> {
    let Some(id) = result.id else {
        return Err(TranslateError::MissingRecord { record: "execution", field: "id" });
    };
    let key = id.to_string();
    Ok(Execution {
        created_at: parse_timestamp("execution", &key, "createdOn", result.created_on.as_deref())?,
        executed_at: parse_timestamp(
            "execution",
            &key,
            "executionDate",
            result.execution_date.as_deref(),
        )?,
        comment: optional_text(result.comment.as_deref()),
        ..linked_execution(key, deps)
    })
}

/// # Errors
/// Returns [`TranslateError::MissingRecord`] when the execution has no id, or
/// [`TranslateError::InvalidField`] for unparseable timestamps.
pub fn execution_from_zapi(
    execution: &zapi::Execution,
    deps: ExecutionDeps<'_>,
) -> Result<Execution, TranslateError> {
    let Some(id) = execution.id else {
        return Err(TranslateError::MissingRecord { record: "execution", field: "id" });
    };
    let key = id.to_string();
    Ok(Execution {
        created_at: parse_timestamp("execution", &key, "createdOn", execution.created_on.as_deref())?,
        executed_at: parse_timestamp(
            "execution",
            &key,
            "executedOn",
            execution.executed_on.as_deref(),
        )?,
        comment: optional_text(execution.comment.as_deref()),
        ..linked_execution(key, deps)
    })
}

/// # Errors
/// Propagates the system-specific translator's error.
pub fn translate_execution(
    execution: &SourceExecution,
    deps: ExecutionDeps<'_>,
) -> Result<Execution, TranslateError> {
    match execution {
        SourceExecution::Scale(result) => execution_from_scale(result, deps),
        SourceExecution::Zapi(execution) => execution_from_zapi(execution, deps),
    }
}

fn linked_execution(key: String, deps: ExecutionDeps<'_>) -> Execution {
    Execution {
        key,
        item_id: Some(deps.item.id),
        cycle_id: Some(deps.cycle.id),
        status_id: Some(deps.status.id),
        executor_id: Some(deps.executor.id),
        created_at: None,
        executed_at: None,
        comment: None,
    }
}

fn required(
    value: Option<&str>,
    record: &'static str,
    field: &'static str,
) -> Result<String, TranslateError> {
    optional_text(value).ok_or(TranslateError::MissingRecord { record, field })
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|trimmed| !trimmed.is_empty()).map(ToString::to_string)
}

fn parse_date(
    record: &'static str,
    key: &str,
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<Date>, TranslateError> {
    let Some(raw) = optional_text(value) else {
        return Ok(None);
    };

    if let Ok(date) = Date::parse(&raw, format_description!("[year]-[month]-[day]")) {
        return Ok(Some(date));
    }

    OffsetDateTime::parse(&raw, &Rfc3339).map(|timestamp| Some(timestamp.date())).map_err(|_| {
        TranslateError::InvalidField { record, key: key.to_string(), field, value: raw.clone() }
    })
}

fn parse_timestamp(
    record: &'static str,
    key: &str,
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<OffsetDateTime>, TranslateError> {
    let Some(raw) = optional_text(value) else {
        return Ok(None);
    };

    if let Ok(timestamp) = OffsetDateTime::parse(&raw, &Rfc3339) {
        return Ok(Some(timestamp));
    }

    Date::parse(&raw, format_description!("[year]-[month]-[day]"))
        .map(|date| Some(date.midnight().assume_utc()))
        .map_err(|_| TranslateError::InvalidField {
            record,
            key: key.to_string(),
            field,
            value: raw.clone(),
        })
}

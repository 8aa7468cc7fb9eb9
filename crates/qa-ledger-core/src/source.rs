//! Record shapes returned by the external test-management systems.
//!
//! Every upstream field is optional: the sources are only partially reliable,
//! and deciding what a missing field means is the translators' job.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    Jira,
    Scale,
    Zapi,
}

impl SourceSystem {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jira => "jira",
            Self::Scale => "scale",
            Self::Zapi => "zapi",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "jira" => Some(Self::Jira),
            "scale" => Some(Self::Scale),
            "zapi" => Some(Self::Zapi),
            _ => None,
        }
    }
}

impl Display for SourceSystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod jira {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Project {
        pub key: Option<String>,
        pub name: Option<String>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Version {
        pub id: Option<String>,
        pub name: Option<String>,
        pub start_date: Option<String>,
        pub release_date: Option<String>,
        pub released: Option<bool>,
    }

    /// A Jira issue used as a test case by the legacy Zephyr API.
    #[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Issue {
        pub key: Option<String>,
        pub summary: Option<String>,
        pub description: Option<String>,
        pub priority: Option<String>,
        pub status: Option<String>,
        pub project_key: Option<String>,
    }
}

pub mod scale {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
    #[serde(rename_all = "camelCase", default)]
    pub struct TestCase {
        pub key: Option<String>,
        pub name: Option<String>,
        pub objective: Option<String>,
        pub priority: Option<String>,
        pub status: Option<String>,
        pub folder: Option<String>,
        pub project_key: Option<String>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
    #[serde(rename_all = "camelCase", default)]
    pub struct TestRun {
        pub key: Option<String>,
        pub name: Option<String>,
        pub folder: Option<String>,
        pub project_key: Option<String>,
        pub version: Option<String>,
        pub planned_start_date: Option<String>,
        pub planned_end_date: Option<String>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
    #[serde(rename_all = "camelCase", default)]
    pub struct TestResult {
        pub id: Option<i64>,
        pub test_case_key: Option<String>,
        pub status: Option<String>,
        pub executed_by: Option<String>,
        pub created_on: Option<String>,
        pub execution_date: Option<String>,
        pub comment: Option<String>,
    }
}

pub mod zapi {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Cycle {
        pub id: Option<i64>,
        pub name: Option<String>,
        pub folder: Option<String>,
        pub project_key: Option<String>,
        pub version_name: Option<String>,
        pub start_date: Option<String>,
        pub end_date: Option<String>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Status {
        pub id: Option<i64>,
        pub name: Option<String>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Execution {
        pub id: Option<i64>,
        pub issue_key: Option<String>,
        pub cycle_id: Option<i64>,
        pub status: Option<Status>,
        pub executed_by: Option<String>,
        pub created_on: Option<String>,
        pub executed_on: Option<String>,
        pub comment: Option<String>,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "system", content = "record", rename_all = "snake_case")]
pub enum SourceTestCase {
    Jira(jira::Issue),
    Scale(scale::TestCase),
}

impl SourceTestCase {
    #[must_use]
    pub fn system(&self) -> SourceSystem {
        match self {
            Self::Jira(_) => SourceSystem::Jira,
            Self::Scale(_) => SourceSystem::Scale,
        }
    }

    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Jira(issue) => issue.key.as_deref(),
            Self::Scale(case) => case.key.as_deref(),
        }
    }

    #[must_use]
    pub fn project_key(&self) -> Option<&str> {
        match self {
            Self::Jira(issue) => issue.project_key.as_deref(),
            Self::Scale(case) => case.project_key.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "system", content = "record", rename_all = "snake_case")]
pub enum SourceTestRun {
    Scale(scale::TestRun),
    Zapi(zapi::Cycle),
}

impl SourceTestRun {
    #[must_use]
    pub fn system(&self) -> SourceSystem {
        match self {
            Self::Scale(_) => SourceSystem::Scale,
            Self::Zapi(_) => SourceSystem::Zapi,
        }
    }

    #[must_use]
    pub fn key(&self) -> Option<String> {
        match self {
            Self::Scale(run) => run.key.clone(),
            Self::Zapi(cycle) => cycle.id.map(|id| id.to_string()),
        }
    }

    #[must_use]
    pub fn project_key(&self) -> Option<&str> {
        match self {
            Self::Scale(run) => run.project_key.as_deref(),
            Self::Zapi(cycle) => cycle.project_key.as_deref(),
        }
    }

    #[must_use]
    pub fn version_name(&self) -> Option<&str> {
        match self {
            Self::Scale(run) => run.version.as_deref(),
            Self::Zapi(cycle) => cycle.version_name.as_deref(),
        }
    }

    #[must_use]
    pub fn folder(&self) -> Option<&str> {
        match self {
            Self::Scale(run) => run.folder.as_deref(),
            Self::Zapi(cycle) => cycle.folder.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "system", content = "record", rename_all = "snake_case")]
pub enum SourceExecution {
    Scale(scale::TestResult),
    Zapi(zapi::Execution),
}

impl SourceExecution {
    #[must_use]
    pub fn system(&self) -> SourceSystem {
        match self {
            Self::Scale(_) => SourceSystem::Scale,
            Self::Zapi(_) => SourceSystem::Zapi,
        }
    }

    #[must_use]
    pub fn key(&self) -> Option<String> {
        match self {
            Self::Scale(result) => result.id.map(|id| id.to_string()),
            Self::Zapi(execution) => execution.id.map(|id| id.to_string()),
        }
    }

    #[must_use]
    pub fn test_case_key(&self) -> Option<&str> {
        match self {
            Self::Scale(result) => result.test_case_key.as_deref(),
            Self::Zapi(execution) => execution.issue_key.as_deref(),
        }
    }

    #[must_use]
    pub fn executor(&self) -> Option<&str> {
        match self {
            Self::Scale(result) => result.executed_by.as_deref(),
            Self::Zapi(execution) => execution.executed_by.as_deref(),
        }
    }

    #[must_use]
    pub fn status_name(&self) -> Option<&str> {
        match self {
            Self::Scale(result) => result.status.as_deref(),
            Self::Zapi(execution) => {
                execution.status.as_ref().and_then(|status| status.name.as_deref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_result_deserializes_from_camel_case() -> Result<(), serde_json::Error> {
        let result: scale::TestResult = serde_json::from_str(
            r#"{"id": 42, "testCaseKey": "QA-T1", "status": "Pass", "executedBy": "jdoe"}"#,
        )?;
        let execution = SourceExecution::Scale(result);

        assert_eq!(execution.key().as_deref(), Some("42"));
        assert_eq!(execution.test_case_key(), Some("QA-T1"));
        assert_eq!(execution.executor(), Some("jdoe"));
        assert_eq!(execution.status_name(), Some("Pass"));
        Ok(())
    }

    #[test]
    fn zapi_status_name_is_read_from_nested_status() -> Result<(), serde_json::Error> {
        let execution: zapi::Execution = serde_json::from_str(
            r#"{"id": 9, "issueKey": "QA-7", "cycleId": 3, "status": {"id": 1, "name": "PASS"}}"#,
        )?;
        let execution = SourceExecution::Zapi(execution);

        assert_eq!(execution.status_name(), Some("PASS"));
        assert_eq!(execution.executor(), None);
        assert_eq!(execution.system(), SourceSystem::Zapi);
        Ok(())
    }

    #[test]
    fn zapi_cycle_key_is_its_numeric_id() {
        let run = SourceTestRun::Zapi(zapi::Cycle { id: Some(17), ..zapi::Cycle::default() });
        assert_eq!(run.key().as_deref(), Some("17"));
        assert_eq!(run.folder(), None);
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use qa_ledger_core::source::jira;
use qa_ledger_core::{SourceExecution, SourceSystem, SourceTestCase, SourceTestRun};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::source::{SourceClient, SourceError};

/// Raw export of one source system, as written by an offline extraction job.
///
/// Record payloads keep the source's own field names; `system` decides which
/// shape each payload is decoded as.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SnapshotDocument {
    system: SourceSystem,
    #[serde(default)]
    projects: Vec<jira::Project>,
    #[serde(default)]
    versions: BTreeMap<String, Vec<jira::Version>>,
    #[serde(default)]
    test_cases: Vec<Value>,
    #[serde(default)]
    test_runs: Vec<Value>,
    #[serde(default)]
    executions: BTreeMap<String, Vec<Value>>,
}

/// [`SourceClient`] served from an in-memory snapshot document.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    system: SourceSystem,
    projects: Vec<jira::Project>,
    versions: BTreeMap<String, Vec<jira::Version>>,
    test_cases: Vec<SourceTestCase>,
    test_runs: Vec<SourceTestRun>,
    executions: BTreeMap<String, Vec<SourceExecution>>,
}

impl SnapshotSource {
    /// # Errors
    /// Returns an error when the file cannot be read or is not a valid snapshot.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("invalid snapshot {}", path.display()))
    }

    /// # Errors
    /// Returns an error when the document is malformed or names a system
    /// that has no test runs.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let document: SnapshotDocument =
            serde_json::from_str(raw).context("failed to parse snapshot JSON")?;
        let system = document.system;

        let (test_cases, test_runs, executions) = match system {
            SourceSystem::Scale => (
                decode_all(document.test_cases, SourceTestCase::Scale)?,
                decode_all(document.test_runs, SourceTestRun::Scale)?,
                decode_grouped(document.executions, SourceExecution::Scale)?,
            ),
            SourceSystem::Zapi => (
                decode_all(document.test_cases, SourceTestCase::Jira)?,
                decode_all(document.test_runs, SourceTestRun::Zapi)?,
                decode_grouped(document.executions, SourceExecution::Zapi)?,
            ),
            SourceSystem::Jira => {
                return Err(anyhow!("jira snapshots carry no test runs; use scale or zapi"));
            }
        };

        Ok(Self {
            system,
            projects: document.projects,
            versions: document.versions,
            test_cases,
            test_runs,
            executions,
        })
    }

    /// Keys of every project in the snapshot, in document order.
    #[must_use]
    pub fn project_keys(&self) -> Vec<String> {
        self.projects.iter().filter_map(|project| project.key.clone()).collect()
    }

    fn rejected(&self, message: String) -> SourceError {
        SourceError::Rejected { system: self.system, message }
    }
}

impl SourceClient for SnapshotSource {
    fn system(&self) -> SourceSystem {
        self.system
    }

    fn get_project(&self, key: &str) -> Result<Option<jira::Project>, SourceError> {
        Ok(self.projects.iter().find(|project| project.key.as_deref() == Some(key)).cloned())
    }

    fn get_project_versions(&self, key: &str) -> Result<Vec<jira::Version>, SourceError> {
        Ok(self.versions.get(key).cloned().unwrap_or_default())
    }

    fn get_test_case(&self, key: &str) -> Result<Option<SourceTestCase>, SourceError> {
        Ok(self.test_cases.iter().find(|case| case.key() == Some(key)).cloned())
    }

    fn get_test_run(&self, key: &str) -> Result<SourceTestRun, SourceError> {
        self.test_runs
            .iter()
            .find(|run| run.key().as_deref() == Some(key))
            .cloned()
            .ok_or_else(|| self.rejected(format!("unknown test run {key}")))
    }

    fn list_test_runs(&self, project_key: &str) -> Result<Vec<SourceTestRun>, SourceError> {
        Ok(self
            .test_runs
            .iter()
            .filter(|run| run.project_key() == Some(project_key))
            .cloned()
            .collect())
    }

    fn list_executions(&self, run_key: &str) -> Result<Vec<SourceExecution>, SourceError> {
        Ok(self.executions.get(run_key).cloned().unwrap_or_default())
    }
}

fn decode_all<R, T>(values: Vec<Value>, wrap: fn(R) -> T) -> Result<Vec<T>>
where
    R: DeserializeOwned,
{
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value(value)
                .map(wrap)
                .with_context(|| format!("failed to decode record #{index}"))
        })
        .collect()
}

fn decode_grouped<R, T>(
    groups: BTreeMap<String, Vec<Value>>,
    wrap: fn(R) -> T,
) -> Result<BTreeMap<String, Vec<T>>>
where
    R: DeserializeOwned,
{
    groups
        .into_iter()
        .map(|(run_key, values)| {
            let decoded = decode_all(values, wrap)
                .with_context(|| format!("failed to decode executions of run {run_key}"))?;
            Ok((run_key, decoded))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE_SNAPSHOT: &str = r#"{
        "system": "scale",
        "projects": [{ "key": "QA", "name": "Quality" }],
        "versions": { "QA": [{ "id": "10", "name": "1.0", "released": true }] },
        "test_cases": [{ "key": "QA-T1", "name": "Login", "projectKey": "QA" }],
        "test_runs": [{ "key": "QA-C1", "name": "Nightly", "folder": "Regression", "projectKey": "QA", "version": "1.0" }],
        "executions": { "QA-C1": [{ "id": 501, "testCaseKey": "QA-T1", "status": "Pass", "executedBy": "jdoe" }] }
    }"#;

    #[test]
    fn scale_snapshot_serves_every_lookup() -> Result<()> {
        let source = SnapshotSource::from_json_str(SCALE_SNAPSHOT)?;
        assert_eq!(source.system(), SourceSystem::Scale);
        assert_eq!(source.project_keys(), vec!["QA".to_string()]);

        let project = source.get_project("QA")?.ok_or_else(|| anyhow!("project missing"))?;
        assert_eq!(project.name.as_deref(), Some("Quality"));
        assert_eq!(source.get_project_versions("QA")?.len(), 1);
        assert!(source.get_project("OPS")?.is_none());

        let case = source.get_test_case("QA-T1")?.ok_or_else(|| anyhow!("case missing"))?;
        assert_eq!(case.system(), SourceSystem::Scale);

        let runs = source.list_test_runs("QA")?;
        assert_eq!(runs.len(), 1);
        assert_eq!(source.get_test_run("QA-C1")?.folder(), Some("Regression"));

        let executions = source.list_executions("QA-C1")?;
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].key().as_deref(), Some("501"));
        Ok(())
    }

    #[test]
    fn unknown_test_run_is_rejected() -> Result<()> {
        let source = SnapshotSource::from_json_str(SCALE_SNAPSHOT)?;
        let err = source.get_test_run("QA-C404").err().ok_or_else(|| anyhow!("expected error"))?;
        assert!(!err.is_transient());
        Ok(())
    }

    #[test]
    fn zapi_snapshot_uses_jira_issues_and_cycles() -> Result<()> {
        let source = SnapshotSource::from_json_str(
            r#"{
                "system": "zapi",
                "projects": [{ "key": "OPS", "name": "Operations" }],
                "test_cases": [{ "key": "OPS-1", "summary": "Failover", "projectKey": "OPS" }],
                "test_runs": [{ "id": 77, "name": "Sprint 4", "projectKey": "OPS", "versionName": "2.1" }],
                "executions": { "77": [{ "id": 9, "issueKey": "OPS-1", "status": { "id": 1, "name": "PASS" } }] }
            }"#,
        )?;

        assert!(matches!(source.get_test_case("OPS-1")?, Some(SourceTestCase::Jira(_))));
        assert_eq!(source.get_test_run("77")?.version_name(), Some("2.1"));
        assert_eq!(source.list_executions("77")?[0].status_name(), Some("PASS"));
        Ok(())
    }

    #[test]
    fn jira_only_snapshot_is_refused() {
        assert!(SnapshotSource::from_json_str(r#"{ "system": "jira" }"#).is_err());
    }

    #[test]
    fn malformed_records_name_their_position() {
        let err = SnapshotSource::from_json_str(
            r#"{ "system": "scale", "test_runs": [{ "key": "QA-C1" }, { "key": 12 }] }"#,
        )
        .err()
        .map(|err| format!("{err:#}"))
        .unwrap_or_default();
        assert!(err.contains("record #1"));
    }
}

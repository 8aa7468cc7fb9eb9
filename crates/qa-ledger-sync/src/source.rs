use qa_ledger_core::source::jira;
use qa_ledger_core::{SourceExecution, SourceSystem, SourceTestCase, SourceTestRun};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SourceError {
    /// Network or timeout failure; worth another attempt.
    #[error("transient {system} failure: {message}")]
    Transient { system: SourceSystem, message: String },
    /// The source refused the request outright.
    #[error("{system} rejected request: {message}")]
    Rejected { system: SourceSystem, message: String },
}

impl SourceError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Read-only view of one external test-management system.
///
/// Implementations own authentication, pagination, and backoff. Lookups by
/// key return `Ok(None)` for records the source does not know.
pub trait SourceClient: Send + Sync {
    fn system(&self) -> SourceSystem;

    /// # Errors
    /// Returns [`SourceError`] when the source cannot be read.
    fn get_project(&self, key: &str) -> Result<Option<jira::Project>, SourceError>;

    /// # Errors
    /// Returns [`SourceError`] when the source cannot be read.
    fn get_project_versions(&self, key: &str) -> Result<Vec<jira::Version>, SourceError>;

    /// # Errors
    /// Returns [`SourceError`] when the source cannot be read.
    fn get_test_case(&self, key: &str) -> Result<Option<SourceTestCase>, SourceError>;

    /// # Errors
    /// Returns [`SourceError`] when the source cannot be read or the run does not exist.
    fn get_test_run(&self, key: &str) -> Result<SourceTestRun, SourceError>;

    /// # Errors
    /// Returns [`SourceError`] when the source cannot be read.
    fn list_test_runs(&self, project_key: &str) -> Result<Vec<SourceTestRun>, SourceError>;

    /// # Errors
    /// Returns [`SourceError`] when the source cannot be read.
    fn list_executions(&self, run_key: &str) -> Result<Vec<SourceExecution>, SourceError>;
}

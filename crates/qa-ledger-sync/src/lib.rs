//! Synchronization engine: walks a source system's project, version, run and
//! execution hierarchy and merges it into the canonical store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use qa_ledger_core::TranslateError;

mod cache;
mod orchestrator;
mod retry;
mod snapshot;
mod source;

pub use cache::IdentityCache;
pub use orchestrator::{
    RunOutcome, RunReport, SkippedExecution, Synchronizer, SyncUnit, UnitReport, UnitStatus,
};
pub use retry::{Fetched, RetryPolicy};
pub use snapshot::SnapshotSource;
pub use source::{SourceClient, SourceError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("run cancelled")]
    Cancelled,
    #[error("{what} unreachable after retries: {last_error}")]
    Unreachable { what: String, last_error: String },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Run-level cancellation signal shared by the caller and every worker.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

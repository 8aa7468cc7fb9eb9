use std::thread;
use std::time::Duration;

use qa_ledger_core::RetryConfig;

use crate::source::SourceError;
use crate::{CancelFlag, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self { max_attempts: config.max_attempts.max(1), delay: Duration::from_millis(config.delay_ms) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched<T> {
    Value(T),
    /// Every attempt failed transiently.
    Exhausted { attempts: u32, last_error: String },
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails non-transiently, or the attempt bound
    /// is reached. The cancel flag is checked before every attempt.
    ///
    /// # Errors
    /// Returns [`SyncError::Cancelled`] when the run was cancelled and
    /// [`SyncError::Source`] for a non-transient failure.
    pub fn fetch<T>(
        &self,
        what: &str,
        cancel: &CancelFlag,
        mut op: impl FnMut() -> Result<T, SourceError>,
    ) -> Result<Fetched<T>, SyncError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if attempt > 1 && !self.delay.is_zero() {
                thread::sleep(self.delay);
            }

            match op() {
                Ok(value) => return Ok(Fetched::Value(value)),
                Err(err) if err.is_transient() => {
                    tracing::debug!(what, attempt, max_attempts = self.max_attempts, error = %err, "fetch attempt failed");
                    last_error = err.to_string();
                }
                Err(err) => return Err(SyncError::Source(err)),
            }
        }

        tracing::warn!(what, attempts = self.max_attempts, error = %last_error, "fetch retries exhausted");
        Ok(Fetched::Exhausted { attempts: self.max_attempts, last_error })
    }
}

use std::path::PathBuf;
use thiserror::Error;

/// Terminal failures of a retrieval run.
///
/// Every variant aborts the run; there is no step-level retry because the
/// portal holds server-side state mid-sequence. Diagnostic-capture failures
/// are logged where they happen and never surface here.
#[derive(Debug, Error)]
pub enum FetchError {
    /// A required setting was missing before the browser was ever launched.
    #[error("missing configuration: {0}")]
    Configuration(String),

    /// A bounded wait for an element or navigation did not resolve in time.
    #[error("step '{step}' timed out after {timeout_ms}ms waiting for {what}")]
    StepTimeout {
        step: String,
        what: String,
        timeout_ms: u64,
    },

    /// A text/attribute search completed but matched nothing. Distinct from
    /// a timeout: the candidates were there, none satisfied the predicate.
    #[error("step '{step}' found no element matching {what}")]
    ElementNotFound { step: String, what: String },

    /// The download poller exhausted its attempt budget.
    #[error("report file never appeared at {path} after {attempts} checks")]
    ArtifactMissing { path: PathBuf, attempts: u32 },

    /// The whole run exceeded its overall deadline.
    #[error("run exceeded the {0}s overall deadline")]
    DeadlineExceeded(u64),

    /// Failure inside the browser driver itself.
    #[error("browser driver error: {0:#}")]
    Driver(anyhow::Error),
}

impl From<anyhow::Error> for FetchError {
    fn from(err: anyhow::Error) -> Self {
        FetchError::Driver(err)
    }
}

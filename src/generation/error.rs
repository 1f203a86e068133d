use super::models::JobState;
use super::validation::ValidationErrors;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Rejected before any remote call.
    #[error("{0}")]
    Validation(ValidationErrors),

    /// Job creation was refused or answered with something unusable. Never retried.
    #[error("job submission failed: {message}")]
    Submission {
        status: Option<u16>,
        message: String,
        remote_body: Option<String>,
    },

    /// The remote job reported failure; `log` is the remote diagnostic verbatim.
    #[error("job {job_id} failed remotely")]
    TerminalFailure { job_id: String, log: Option<String> },

    /// Polling budget spent while the job was still running. Re-poll the same id.
    #[error("job {job_id} still '{last_status}' after {attempts} status checks")]
    Timeout {
        job_id: String,
        attempts: u32,
        last_status: String,
        log: Option<String>,
    },

    /// The remote job succeeded but its output never reached storage.
    #[error("job {job_id} completed but artifact '{key}' never appeared in storage")]
    ArtifactMissing { job_id: String, key: String },

    #[error("unknown job {0}")]
    UnknownJob(String),

    #[error("job {job_id} has not succeeded (state: {state:?})")]
    NotSucceeded { job_id: String, state: JobState },

    #[error("object storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<ValidationErrors> for OrchestratorError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl OrchestratorError {
    /// Short machine-readable kind, used as the `error` field of API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Submission { .. } => "SubmissionError",
            Self::TerminalFailure { .. } => "TerminalFailure",
            Self::Timeout { .. } => "TimeoutFailure",
            Self::ArtifactMissing { .. } => "ArtifactMissingError",
            Self::UnknownJob(_) => "NotFound",
            Self::NotSucceeded { .. } => "Conflict",
            Self::Storage(_) => "StorageError",
        }
    }

    /// Remote diagnostic payload attached verbatim, if any.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::Submission { remote_body, .. } => remote_body.clone(),
            Self::TerminalFailure { log, .. } | Self::Timeout { log, .. } => log.clone(),
            _ => None,
        }
    }

    /// Timeouts can be resolved by polling the same job again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

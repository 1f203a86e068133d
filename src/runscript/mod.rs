//! Client side of the remote rendering service (Typefi RunScript).

pub mod client;
pub mod models;

pub use client::{RunScriptClient, RunScriptConfig};
pub use models::{JobCreated, JobInput, JobOutput, JobSpec, NamedValue, RemoteJob, RemoteStatus};

#[derive(Debug, thiserror::Error)]
pub enum RunScriptError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("RunScript request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// RunScript returned a non-2xx status code.
    #[error("RunScript API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// A 2xx response whose body was not what the API documents.
    #[error("malformed RunScript response: {message}; body: {body}")]
    Malformed { message: String, body: String },
}

impl RunScriptError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            Self::Malformed { .. } => None,
        }
    }

    /// The remote payload, untouched, when one was received.
    pub fn remote_body(&self) -> Option<&str> {
        match self {
            Self::Api { body, .. } | Self::Malformed { body, .. } => Some(body),
            Self::Request(_) => None,
        }
    }
}

/// Job queue operations the orchestrator drives.
#[async_trait::async_trait]
pub trait RenderingService {
    async fn create_job(&self, spec: &JobSpec) -> Result<JobCreated, RunScriptError>;

    /// Idempotent status query.
    async fn get_job(&self, job_id: &str) -> Result<RemoteJob, RunScriptError>;
}

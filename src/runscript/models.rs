//! Wire types for the RunScript job API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A file the remote job downloads into its working folder before the script runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    #[serde(rename = "href")]
    pub source: String,
    #[serde(rename = "path")]
    pub destination_path: String,
}

/// A file the remote job uploads once the script finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    #[serde(rename = "path")]
    pub destination_path: String,
    #[serde(rename = "href")]
    pub destination_ref: String,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: String,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Payload of `POST /job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub inputs: Vec<JobInput>,
    pub outputs: Vec<JobOutput>,
    pub args: Vec<NamedValue>,
    pub script: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<NamedValue>,
}

impl JobSpec {
    /// A job with no files that only writes to the remote console.
    pub fn connectivity_check() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            args: Vec::new(),
            script: "app.consoleout('Test');".to_string(),
            metadata: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobCreated {
    #[serde(rename = "_id", alias = "id", alias = "jobId")]
    pub id: String,
}

/// Status as reported by the remote service, normalised into the states the
/// orchestrator reasons about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    Running,
    Complete,
    Failed,
    /// Anything the service reports that we do not recognise; treated as still running.
    Other(String),
}

impl RemoteStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "submitted" | "queued" | "pending" | "waiting" => Self::Pending,
            "running" | "processing" | "started" => Self::Running,
            "complete" | "completed" | "success" | "succeeded" => Self::Complete,
            "failed" | "failure" | "error" | "cancelled" | "canceled" => Self::Failed,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of `GET /job/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteJob {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub log: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub outputs: Option<Value>,
}

impl RemoteJob {
    pub fn status(&self) -> RemoteStatus {
        RemoteStatus::parse(&self.status)
    }

    /// The remote diagnostic text: the job log, falling back to the error field.
    /// Strings are returned untouched; structured payloads as compact JSON.
    pub fn log_text(&self) -> Option<String> {
        self.log
            .as_ref()
            .or(self.error.as_ref())
            .filter(|value| !value.is_null())
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
    }
}

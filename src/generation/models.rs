use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::runscript::RemoteStatus;

/// One request to render a document from a template.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GenerationRequest {
    #[serde(alias = "templateId", alias = "templateName")]
    pub template_id: String,
    /// Recipient field values, in the order the caller supplied them.
    #[serde(default)]
    pub fields: IndexMap<String, String>,
}

impl GenerationRequest {
    pub fn new(template_id: impl Into<String>) -> Self {
        Self {
            template_id: template_id.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Lifecycle of a submitted job as seen by the orchestrator.
///
/// `Created` is transient inside `submit` and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Polling,
    Succeeded,
    ArtifactResolving,
    ArtifactReady,
    ArtifactMissing,
    Failed,
    TimedOut,
}

impl JobState {
    /// Remote job reported success; artifact resolution may proceed.
    pub fn has_succeeded(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::ArtifactResolving | Self::ArtifactReady
        )
    }

    /// No further polling or resolution will change the outcome.
    pub fn is_final(self) -> bool {
        matches!(self, Self::ArtifactReady | Self::ArtifactMissing | Self::Failed)
    }

    /// The caller-facing status class.
    pub fn public_status(self) -> PublicStatus {
        match self {
            Self::ArtifactReady => PublicStatus::Done,
            Self::ArtifactMissing | Self::Failed | Self::TimedOut => PublicStatus::Failed,
            Self::Submitted | Self::Polling | Self::Succeeded | Self::ArtifactResolving => {
                PublicStatus::InProgress
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum PublicStatus {
    InProgress,
    Done,
    Failed,
}

/// Where a finished artifact can be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ArtifactLocation {
    pub key: String,
    pub url: String,
    pub exists: bool,
    pub expires_at: DateTime<Utc>,
}

/// The orchestrator's record of one remote job.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobHandle {
    pub job_id: String,
    pub template_id: String,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: JobState,
    /// Storage key the output is delivered to.
    pub output_key: String,
    pub poll_attempts: u32,
    #[schema(value_type = Option<String>)]
    #[serde(serialize_with = "serialize_status")]
    pub last_status: Option<RemoteStatus>,
    pub last_log: Option<String>,
    pub artifact: Option<ArtifactLocation>,
}

fn serialize_status<S>(status: &Option<RemoteStatus>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match status {
        Some(status) => serializer.serialize_some(status.as_str()),
        None => serializer.serialize_none(),
    }
}

impl JobHandle {
    pub fn submitted(job_id: String, template_id: String, output_key: String) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            template_id,
            submitted_at: now,
            updated_at: now,
            state: JobState::Submitted,
            output_key,
            poll_attempts: 0,
            last_status: None,
            last_log: None,
            artifact: None,
        }
    }

    /// Apply one status observation from the remote service.
    ///
    /// Non-terminal observations move a live handle to `Polling` but never pull a
    /// `TimedOut` handle back into it. Final states ignore observations entirely.
    pub fn observe(&mut self, status: RemoteStatus, log: Option<String>) {
        if self.state.is_final() || self.state.has_succeeded() {
            return;
        }

        self.poll_attempts += 1;
        self.updated_at = Utc::now();
        if log.is_some() {
            self.last_log = log;
        }

        self.state = match (&status, self.state) {
            (RemoteStatus::Complete, _) => JobState::Succeeded,
            (RemoteStatus::Failed, _) => JobState::Failed,
            (_, JobState::TimedOut) => JobState::TimedOut,
            _ => JobState::Polling,
        };
        self.last_status = Some(status);
    }

    /// A status query that never reached the service; counts as non-terminal.
    pub fn observe_unreachable(&mut self, diagnostic: String) {
        if self.state.is_final() || self.state.has_succeeded() {
            return;
        }
        self.poll_attempts += 1;
        self.updated_at = Utc::now();
        self.last_log = Some(diagnostic);
        if self.state != JobState::TimedOut {
            self.state = JobState::Polling;
        }
    }

    pub fn mark_timed_out(&mut self) {
        if matches!(self.state, JobState::Submitted | JobState::Polling) {
            self.state = JobState::TimedOut;
            self.updated_at = Utc::now();
        }
    }

    pub fn mark_resolving(&mut self) {
        if self.state == JobState::Succeeded {
            self.state = JobState::ArtifactResolving;
            self.updated_at = Utc::now();
        }
    }

    /// Resolution was interrupted by a storage error; a later resolve starts over.
    pub fn mark_unresolved(&mut self) {
        if self.state == JobState::ArtifactResolving {
            self.state = JobState::Succeeded;
            self.updated_at = Utc::now();
        }
    }

    pub fn mark_ready(&mut self, artifact: ArtifactLocation) {
        if self.state.has_succeeded() {
            self.state = JobState::ArtifactReady;
            self.artifact = Some(artifact);
            self.updated_at = Utc::now();
        }
    }

    pub fn mark_missing(&mut self) {
        if matches!(self.state, JobState::Succeeded | JobState::ArtifactResolving) {
            self.state = JobState::ArtifactMissing;
            self.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> JobHandle {
        JobHandle::submitted(
            "job-1".to_string(),
            "eotm".to_string(),
            "certificates/alex.pdf".to_string(),
        )
    }

    #[test]
    fn test_observe_moves_through_polling_to_success() {
        let mut h = handle();
        h.observe(RemoteStatus::Pending, None);
        assert_eq!(h.state, JobState::Polling);
        h.observe(RemoteStatus::Complete, Some("done".to_string()));
        assert_eq!(h.state, JobState::Succeeded);
        assert_eq!(h.poll_attempts, 2);
        assert_eq!(h.last_log.as_deref(), Some("done"));
    }

    #[test]
    fn test_failed_handle_ignores_later_observations() {
        let mut h = handle();
        h.observe(RemoteStatus::Failed, Some("font missing".to_string()));
        h.observe(RemoteStatus::Running, None);
        h.observe(RemoteStatus::Complete, None);

        assert_eq!(h.state, JobState::Failed);
        assert_eq!(h.poll_attempts, 1);
        assert_eq!(h.last_log.as_deref(), Some("font missing"));
    }

    #[test]
    fn test_timed_out_handle_never_returns_to_polling() {
        let mut h = handle();
        h.observe(RemoteStatus::Running, None);
        h.mark_timed_out();
        h.observe(RemoteStatus::Running, None);
        h.observe_unreachable("connection reset".to_string());
        assert_eq!(h.state, JobState::TimedOut);

        h.observe(RemoteStatus::Complete, None);
        assert_eq!(h.state, JobState::Succeeded);
    }

    #[test]
    fn test_interrupted_resolution_returns_to_succeeded() {
        let mut h = handle();
        h.observe(RemoteStatus::Complete, None);
        h.mark_resolving();
        assert_eq!(h.state, JobState::ArtifactResolving);

        h.mark_unresolved();
        assert_eq!(h.state, JobState::Succeeded);

        h.mark_missing();
        h.mark_unresolved();
        assert_eq!(h.state, JobState::ArtifactMissing, "final states are kept");
    }

    #[test]
    fn test_public_status_classes() {
        assert_eq!(JobState::Polling.public_status(), PublicStatus::InProgress);
        assert_eq!(JobState::ArtifactResolving.public_status(), PublicStatus::InProgress);
        assert_eq!(JobState::ArtifactReady.public_status(), PublicStatus::Done);
        assert_eq!(JobState::TimedOut.public_status(), PublicStatus::Failed);
        assert_eq!(JobState::ArtifactMissing.public_status(), PublicStatus::Failed);
    }

    #[test]
    fn test_request_keeps_field_order() {
        let json = r#"{"templateName": "T1", "fields": {"name": "Alex Doe", "date": "2024-05-01"}}"#;
        let request: GenerationRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.template_id, "T1");
        let names: Vec<&String> = request.fields.keys().collect();
        assert_eq!(names, vec!["name", "date"]);
    }
}

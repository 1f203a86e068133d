//! Drives a generation request through the remote rendering service:
//! submit, poll until a terminal status, then confirm and sign the output.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use uuid::Uuid;

use super::error::OrchestratorError;
use super::models::{ArtifactLocation, GenerationRequest, JobHandle, JobState};
use super::registry::JobRegistry;
use super::templates::{slugify, TemplateCatalog};
use super::validation::ValidationErrors;
use crate::delivery::OutputDelivery;
use crate::runscript::{JobInput, JobOutput, JobSpec, NamedValue, RenderingService};
use crate::storage::ObjectStorage;

/// How often, and how many times, to ask the service for a job's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollBudget {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on the wall-clock time a full poll can take.
    pub fn total(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll: PollBudget,
    pub artifact_check_attempts: u32,
    pub artifact_check_interval: Duration,
    pub download_url_ttl: Duration,
    /// Lifetime of read URLs handed to the service for template assets.
    pub asset_url_ttl: Duration,
    pub output_prefix: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let poll = PollBudget::new(Duration::from_secs(3), 100);
        Self {
            poll,
            artifact_check_attempts: 5,
            artifact_check_interval: Duration::from_secs(1),
            download_url_ttl: Duration::from_secs(3600),
            asset_url_ttl: poll.total() + Duration::from_secs(600),
            output_prefix: "certificates".to_string(),
        }
    }
}

pub struct JobOrchestrator {
    renderer: Arc<dyn RenderingService + Send + Sync>,
    storage: Arc<dyn ObjectStorage + Send + Sync>,
    delivery: Arc<dyn OutputDelivery + Send + Sync>,
    catalog: TemplateCatalog,
    registry: JobRegistry,
    settings: OrchestratorSettings,
}

impl JobOrchestrator {
    pub fn new(
        renderer: Arc<dyn RenderingService + Send + Sync>,
        storage: Arc<dyn ObjectStorage + Send + Sync>,
        delivery: Arc<dyn OutputDelivery + Send + Sync>,
        catalog: TemplateCatalog,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            renderer,
            storage,
            delivery,
            catalog,
            registry: JobRegistry::new(),
            settings,
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn job(&self, job_id: &str) -> Option<JobHandle> {
        self.registry.get(job_id)
    }

    /// Stop tracking a job. The remote job is not contacted.
    pub fn evict(&self, job_id: &str) -> Option<JobHandle> {
        let evicted = self.registry.remove(job_id);
        if evicted.is_some() {
            info!("Evicted job {}", job_id);
        }
        evicted
    }

    /// Validate, build the job spec and submit it once.
    ///
    /// Submission is never retried: the service may deduplicate identical
    /// inputs and arguments, so a blind retry could hand back a stale render.
    pub async fn submit(&self, request: GenerationRequest) -> Result<JobHandle, OrchestratorError> {
        let template = self
            .catalog
            .get(&request.template_id)
            .map_err(ValidationErrors::from)?;
        template.validate(&request)?;

        let recipient = template.recipient(&request).unwrap_or_default();
        let output_key = self.output_key(recipient, &template.output_path);
        debug!(
            "Preparing job for template '{}' with output key '{}'",
            template.id, output_key
        );

        let mut inputs = Vec::new();
        for asset in template.inputs() {
            let source = self
                .storage
                .create_signed_url(&asset.key, self.settings.asset_url_ttl)
                .await?;
            inputs.push(JobInput {
                source,
                destination_path: asset.path.clone(),
            });
        }

        let target = self.delivery.prepare(&output_key).await?;
        let spec = JobSpec {
            inputs,
            outputs: vec![JobOutput {
                destination_path: template.output_path.clone(),
                destination_ref: target.href.clone(),
                method: target.method.clone(),
            }],
            args: template.script_args(&request),
            script: template.script.clone(),
            metadata: vec![
                NamedValue::new("template", &template.id),
                NamedValue::new("recipient", recipient),
            ],
        };

        let created = match self.renderer.create_job(&spec).await {
            Ok(created) => created,
            Err(err) => {
                error!("RunScript rejected job for '{}': {}", template.id, err);
                self.delivery.release(&target).await;
                return Err(OrchestratorError::Submission {
                    status: err.status(),
                    message: err.to_string(),
                    remote_body: err.remote_body().map(str::to_string),
                });
            }
        };

        let job_id = created.id.trim().to_string();
        if job_id.is_empty() {
            self.delivery.release(&target).await;
            return Err(OrchestratorError::Submission {
                status: None,
                message: "response carried an empty job identifier".to_string(),
                remote_body: None,
            });
        }

        let handle = JobHandle::submitted(job_id, template.id.clone(), output_key);
        self.registry.insert(handle.clone());
        info!(
            "Submitted RunScript job {} (template '{}', delivery {:?})",
            handle.job_id,
            handle.template_id,
            self.delivery.mode()
        );
        Ok(handle)
    }

    /// Poll until the job reaches a terminal status or `budget` runs out, then
    /// resolve the artifact on success.
    ///
    /// Dropping the returned future abandons polling; the remote job carries on
    /// and the same id can be polled again later.
    pub async fn await_completion(
        &self,
        job_id: &str,
        budget: PollBudget,
    ) -> Result<ArtifactLocation, OrchestratorError> {
        let handle = self.tracked(job_id)?;
        match handle.state {
            JobState::Failed => return Err(terminal_failure(&handle)),
            JobState::ArtifactMissing => return Err(artifact_missing(&handle)),
            state if state.has_succeeded() => return self.resolve_artifact(job_id).await,
            _ => {}
        }

        for attempt in 1..=budget.max_attempts {
            let observed = match self.renderer.get_job(job_id).await {
                Ok(remote) => {
                    let status = remote.status();
                    let log = remote.log_text();
                    debug!("Job {} attempt {}: status '{}'", job_id, attempt, status);
                    self.registry.update(job_id, |h| h.observe(status, log))
                }
                Err(err) => {
                    warn!("Status query for job {} failed: {}", job_id, err);
                    self.registry
                        .update(job_id, |h| h.observe_unreachable(err.to_string()))
                }
            };
            let handle = observed.ok_or_else(|| OrchestratorError::UnknownJob(job_id.to_string()))?;

            match handle.state {
                JobState::Failed => {
                    error!("Job {} failed remotely", job_id);
                    return Err(terminal_failure(&handle));
                }
                state if state.has_succeeded() => {
                    info!("Job {} completed after {} status check(s)", job_id, attempt);
                    return self.resolve_artifact(job_id).await;
                }
                _ => {}
            }

            if attempt < budget.max_attempts {
                tokio::time::sleep(budget.interval).await;
            }
        }

        let handle = self
            .registry
            .update(job_id, JobHandle::mark_timed_out)
            .ok_or_else(|| OrchestratorError::UnknownJob(job_id.to_string()))?;
        warn!(
            "Job {} still not terminal after {} status check(s)",
            job_id, budget.max_attempts
        );
        Err(OrchestratorError::Timeout {
            job_id: job_id.to_string(),
            attempts: budget.max_attempts,
            last_status: handle
                .last_status
                .as_ref()
                .map_or_else(|| "submitted".to_string(), |s| s.to_string()),
            log: handle.last_log,
        })
    }

    /// Poll with the configured budget.
    pub async fn drive(&self, job_id: &str) -> Result<ArtifactLocation, OrchestratorError> {
        self.await_completion(job_id, self.settings.poll).await
    }

    /// A single status query, used to re-check a timed-out job on demand.
    pub async fn refresh(&self, job_id: &str) -> Result<ArtifactLocation, OrchestratorError> {
        self.await_completion(job_id, PollBudget::new(Duration::ZERO, 1))
            .await
    }

    /// Confirm the output reached storage and mint a read URL for it.
    ///
    /// Safe to call repeatedly once the job has succeeded; every call signs a
    /// fresh URL for the same object and never touches the rendering service.
    pub async fn resolve_artifact(&self, job_id: &str) -> Result<ArtifactLocation, OrchestratorError> {
        let handle = self.tracked(job_id)?;
        match handle.state {
            JobState::ArtifactReady => return self.sign(&handle.output_key).await,
            JobState::ArtifactMissing => return Err(artifact_missing(&handle)),
            JobState::Succeeded | JobState::ArtifactResolving => {}
            state => {
                return Err(OrchestratorError::NotSucceeded {
                    job_id: job_id.to_string(),
                    state,
                })
            }
        }

        self.registry.update(job_id, JobHandle::mark_resolving);

        // Completion can be reported before the delivery path finishes writing.
        let attempts = self.settings.artifact_check_attempts.max(1);
        let mut present = false;
        let mut seen_absent = false;
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.storage.file_exists(&handle.output_key).await {
                Ok(true) => {
                    present = true;
                    break;
                }
                Ok(false) => {
                    seen_absent = true;
                    debug!(
                        "Artifact '{}' not in storage yet (check {}/{})",
                        handle.output_key, attempt, attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "Existence check for '{}' failed (check {}/{}): {}",
                        handle.output_key, attempt, attempts, e
                    );
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.artifact_check_interval).await;
            }
        }

        if !present {
            // Storage never answered, so absence is unproven.
            if let (false, Some(e)) = (seen_absent, last_error) {
                self.registry.update(job_id, JobHandle::mark_unresolved);
                return Err(e.into());
            }
            error!(
                "Job {} reported success but '{}' never appeared in storage",
                job_id, handle.output_key
            );
            self.registry.update(job_id, JobHandle::mark_missing);
            return Err(artifact_missing(&handle));
        }

        let location = match self.sign(&handle.output_key).await {
            Ok(location) => location,
            Err(e) => {
                error!("Could not sign download URL for job {}: {}", job_id, e);
                self.registry.update(job_id, JobHandle::mark_unresolved);
                return Err(e);
            }
        };
        self.registry
            .update(job_id, |h| h.mark_ready(location.clone()));
        info!("Artifact for job {} ready at '{}'", job_id, handle.output_key);
        Ok(location)
    }

    /// Submit a no-op script to check credentials and reachability.
    pub async fn check_connectivity(&self) -> Result<String, OrchestratorError> {
        self.renderer
            .create_job(&JobSpec::connectivity_check())
            .await
            .map(|created| created.id)
            .map_err(|err| OrchestratorError::Submission {
                status: err.status(),
                message: err.to_string(),
                remote_body: err.remote_body().map(str::to_string),
            })
    }

    fn tracked(&self, job_id: &str) -> Result<JobHandle, OrchestratorError> {
        self.registry
            .get(job_id)
            .ok_or_else(|| OrchestratorError::UnknownJob(job_id.to_string()))
    }

    async fn sign(&self, key: &str) -> Result<ArtifactLocation, OrchestratorError> {
        let ttl = self.settings.download_url_ttl;
        let url = self.storage.create_signed_url(key, ttl).await?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        Ok(ArtifactLocation {
            key: key.to_string(),
            url,
            exists: true,
            expires_at,
        })
    }

    /// `{prefix}/{recipient-slug}-{unique}.{ext}`; unique so renders never collide.
    fn output_key(&self, recipient: &str, output_path: &str) -> String {
        let extension = Path::new(output_path)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("pdf");
        let prefix = self.settings.output_prefix.trim_matches('/');
        let name = format!(
            "{}-{}.{}",
            slugify(recipient, "recipient"),
            Uuid::new_v4().simple(),
            extension
        );
        if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        }
    }
}

fn terminal_failure(handle: &JobHandle) -> OrchestratorError {
    OrchestratorError::TerminalFailure {
        job_id: handle.job_id.clone(),
        log: handle.last_log.clone(),
    }
}

fn artifact_missing(handle: &JobHandle) -> OrchestratorError {
    OrchestratorError::ArtifactMissing {
        job_id: handle.job_id.clone(),
        key: handle.output_key.clone(),
    }
}

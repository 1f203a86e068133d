//! HTTP client for the RunScript REST API.

use super::models::{JobCreated, JobSpec, RemoteJob};
use super::{RenderingService, RunScriptError};

pub const DEFAULT_BASE_URL: &str = "https://runscript.typefi.com/api/v2";

#[derive(Clone)]
pub struct RunScriptConfig {
    pub base_url: String,
    pub key: String,
    pub secret: String,
}

impl std::fmt::Debug for RunScriptConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key_prefix: String = self.key.chars().take(5).collect();
        f.debug_struct("RunScriptConfig")
            .field("base_url", &self.base_url)
            .field("key", &format!("{key_prefix}..."))
            .finish_non_exhaustive()
    }
}

pub struct RunScriptClient {
    client: reqwest::Client,
    config: RunScriptConfig,
}

impl RunScriptClient {
    /// Reuses an existing [`reqwest::Client`] so connections are pooled with the
    /// storage client.
    pub fn new(client: reqwest::Client, config: RunScriptConfig) -> Self {
        Self { client, config }
    }

    fn job_url(&self, suffix: Option<&str>) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match suffix {
            Some(id) => format!("{base}/job/{id}"),
            None => format!("{base}/job"),
        }
    }

    /// Read the body as text first so a malformed payload can be reported verbatim.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RunScriptError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        if !status.is_success() {
            return Err(RunScriptError::Api {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|err| RunScriptError::Malformed {
            message: err.to_string(),
            body,
        })
    }
}

#[async_trait::async_trait]
impl RenderingService for RunScriptClient {
    async fn create_job(&self, spec: &JobSpec) -> Result<JobCreated, RunScriptError> {
        log::debug!(
            "Submitting RunScript job: {} input(s), {} output(s), {} arg(s)",
            spec.inputs.len(),
            spec.outputs.len(),
            spec.args.len()
        );

        let response = self
            .client
            .post(self.job_url(None))
            .basic_auth(&self.config.key, Some(&self.config.secret))
            .json(spec)
            .send()
            .await?;

        let created: JobCreated = Self::parse_response(response).await?;
        if created.id.trim().is_empty() {
            return Err(RunScriptError::Malformed {
                message: "job identifier is empty".to_string(),
                body: String::new(),
            });
        }
        Ok(created)
    }

    async fn get_job(&self, job_id: &str) -> Result<RemoteJob, RunScriptError> {
        let response = self
            .client
            .get(self.job_url(Some(job_id)))
            .basic_auth(&self.config.key, Some(&self.config.secret))
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

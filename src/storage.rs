//! Object storage backed by the Supabase Storage REST API.
//!
//! The orchestrator only needs a handful of operations from the store: raw puts,
//! existence checks and time-limited read/write capability URLs.

use std::env;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("storage returned {status} for '{key}': {body}")]
    Api {
        key: String,
        status: u16,
        body: String,
    },
    #[error("invalid storage url: {0}")]
    InvalidUrl(String),
    #[error("storage configuration error: {0}")]
    Config(String),
}

/// Narrow blob-store contract used by the orchestrator and the relay endpoint.
#[async_trait::async_trait]
pub trait ObjectStorage {
    /// Store `data` under `key`, replacing any existing object.
    async fn upload_file(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError>;

    async fn file_exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Mint a read-capability URL valid for `ttl`.
    async fn create_signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Mint a write-capability URL accepting a `PUT` of the object bytes.
    async fn create_signed_upload_url(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError>;

    async fn delete_file(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub service_key: String,
    pub bucket_name: String,
}

impl SupabaseConfig {
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let supabase_url = lookup("SUPABASE_URL")
            .ok_or_else(|| StorageError::Config("SUPABASE_URL must be set".to_string()))?;
        let service_key = lookup("SUPABASE_SERVICE_KEY")
            .or_else(|| lookup("SUPABASE_ANON_KEY"))
            .ok_or_else(|| {
                StorageError::Config(
                    "SUPABASE_SERVICE_KEY (or SUPABASE_ANON_KEY) must be set".to_string(),
                )
            })?;
        let bucket_name = lookup("BUCKET_NAME")
            .ok_or_else(|| StorageError::Config("BUCKET_NAME must be set".to_string()))?;

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            service_key,
            bucket_name,
        })
    }
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

#[derive(Deserialize)]
struct SignedUploadResponse {
    url: String,
}

pub struct SupabaseStorage {
    config: SupabaseConfig,
    client: reqwest::Client,
}

impl SupabaseStorage {
    pub fn new(config: SupabaseConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Build `{supabase}/storage/v1/{prefix...}/{bucket}/{key...}` with each key
    /// segment percent-encoded.
    fn object_url(&self, prefix: &[&str], key: &str) -> Result<Url, StorageError> {
        let mut url = Url::parse(&format!("{}/storage/v1", self.config.supabase_url))
            .map_err(|e| StorageError::InvalidUrl(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::InvalidUrl(self.config.supabase_url.clone()))?;
            segments.pop_if_empty();
            segments.extend(prefix.iter().copied());
            segments.push(&self.config.bucket_name);
            segments.extend(key.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    /// Signed paths come back relative to `/storage/v1`.
    fn absolute(&self, relative: &str) -> String {
        if relative.starts_with("http://") || relative.starts_with("https://") {
            return relative.to_string();
        }
        let relative = relative.trim_start_matches('/');
        format!("{}/storage/v1/{}", self.config.supabase_url, relative)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.config.service_key)
            .header("apikey", &self.config.service_key)
    }

    async fn ensure_success(
        key: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(StorageError::Api {
            key: key.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait::async_trait]
impl ObjectStorage for SupabaseStorage {
    async fn upload_file(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        let url = self.object_url(&["object"], key)?;
        log::debug!("Uploading {} bytes to storage key '{}'", data.len(), key);

        let response = self
            .authorized(self.client.post(url))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(data.to_vec())
            .send()
            .await?;
        Self::ensure_success(key, response).await?;

        log::info!("Stored object '{}' ({} bytes)", key, data.len());
        Ok(())
    }

    async fn file_exists(&self, key: &str) -> Result<bool, StorageError> {
        let url = self.object_url(&["object"], key)?;
        let response = self.authorized(self.client.head(url)).send().await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            // Missing objects come back as 400 on older storage-api releases.
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Ok(false),
            _ => Self::ensure_success(key, response).await.map(|_| true),
        }
    }

    async fn create_signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let url = self.object_url(&["object", "sign"], key)?;
        let response = self
            .authorized(self.client.post(url))
            .json(&serde_json::json!({ "expiresIn": ttl.as_secs().max(1) }))
            .send()
            .await?;
        let signed: SignedUrlResponse = Self::ensure_success(key, response).await?.json().await?;
        Ok(self.absolute(&signed.signed_url))
    }

    /// Supabase fixes signed upload URLs at two hours; `ttl` only documents intent.
    async fn create_signed_upload_url(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let url = self.object_url(&["object", "upload", "sign"], key)?;
        log::debug!(
            "Requesting signed upload url for '{}' (wanted ttl {}s)",
            key,
            ttl.as_secs()
        );
        let response = self
            .authorized(self.client.post(url))
            .header("x-upsert", "true")
            .send()
            .await?;
        let signed: SignedUploadResponse =
            Self::ensure_success(key, response).await?.json().await?;
        Ok(self.absolute(&signed.url))
    }

    async fn delete_file(&self, key: &str) -> Result<(), StorageError> {
        let url = self.object_url(&["object"], key)?;
        let response = self.authorized(self.client.delete(url)).send().await?;
        Self::ensure_success(key, response).await?;
        Ok(())
    }
}

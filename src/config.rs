//! Service configuration read from the environment (and `.env` via dotenvy).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::delivery::DeliveryMode;
use crate::generation::{OrchestratorSettings, PollBudget};
use crate::runscript::client::DEFAULT_BASE_URL;
use crate::runscript::RunScriptConfig;
use crate::storage::{StorageError, SupabaseConfig};

const MIN_POLL_INTERVAL_SECS: u64 = 2;
const MAX_POLL_INTERVAL_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub runscript: RunScriptConfig,
    pub supabase: SupabaseConfig,
    pub delivery_mode: DeliveryMode,
    /// Externally reachable base URL of this service; relay callbacks point here.
    pub public_base_url: Option<String>,
    pub relay_token_ttl: Duration,
    pub orchestrator: OrchestratorSettings,
    pub job_retention: Duration,
    pub templates_file: Option<PathBuf>,
    pub bind_addr: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let runscript = RunScriptConfig {
            base_url: lookup("RUNSCRIPT_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            key: required(&lookup, "RUNSCRIPT_KEY")?,
            secret: required(&lookup, "RUNSCRIPT_SECRET")?,
        };
        let supabase = SupabaseConfig::from_lookup(&lookup)?;

        let delivery_mode = match lookup("DELIVERY_MODE") {
            Some(raw) => raw.parse::<DeliveryMode>().map_err(|reason| ConfigError::Invalid {
                var: "DELIVERY_MODE",
                value: raw.clone(),
                reason,
            })?,
            None => DeliveryMode::Direct,
        };
        let public_base_url = lookup("PUBLIC_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        if delivery_mode == DeliveryMode::Relay && public_base_url.is_none() {
            return Err(ConfigError::Missing("PUBLIC_BASE_URL"));
        }

        let requested_interval: u64 = parse_or(&lookup, "POLL_INTERVAL_SECS", 3)?;
        let interval_secs = requested_interval.clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS);
        if interval_secs != requested_interval {
            log::warn!(
                "POLL_INTERVAL_SECS={} out of range, using {}s",
                requested_interval,
                interval_secs
            );
        }
        let max_attempts: u32 = parse_or(&lookup, "POLL_MAX_ATTEMPTS", 100)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "POLL_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "at least one status check is required".to_string(),
            });
        }
        let poll = PollBudget::new(Duration::from_secs(interval_secs), max_attempts);

        let orchestrator = OrchestratorSettings {
            poll,
            artifact_check_attempts: parse_or(&lookup, "ARTIFACT_CHECK_ATTEMPTS", 5)?,
            artifact_check_interval: Duration::from_millis(parse_or(
                &lookup,
                "ARTIFACT_CHECK_INTERVAL_MS",
                1000,
            )?),
            download_url_ttl: Duration::from_secs(parse_or(&lookup, "DOWNLOAD_URL_TTL_SECS", 3600)?),
            asset_url_ttl: poll.total() + Duration::from_secs(600),
            output_prefix: lookup("OUTPUT_PREFIX").unwrap_or_else(|| "certificates".to_string()),
        };

        let relay_token_ttl = match lookup("RELAY_TOKEN_TTL_SECS") {
            Some(_) => Duration::from_secs(parse_or(&lookup, "RELAY_TOKEN_TTL_SECS", 0)?),
            None => poll.total() + Duration::from_secs(300),
        };

        Ok(Self {
            runscript,
            supabase,
            delivery_mode,
            public_base_url,
            relay_token_ttl,
            orchestrator,
            job_retention: Duration::from_secs(parse_or(&lookup, "JOB_RETENTION_SECS", 86_400)?),
            templates_file: lookup("TEMPLATES_FILE").map(PathBuf::from),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
        })
    }
}

fn required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

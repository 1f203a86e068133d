//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, ConfigError};
use crate::delivery::{DeliveryMode, DirectWriteDelivery, OutputDelivery, RelayDelivery, RelayTokens};
use crate::generation::registry::start_eviction_worker;
use crate::generation::templates::{TemplateCatalog, TemplateError};
use crate::generation::{JobOrchestrator, OrchestratorSettings};
use crate::runscript::{RenderingService, RunScriptClient};
use crate::storage::{ObjectStorage, SupabaseStorage};

const EVICTION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
    pub storage: Arc<dyn ObjectStorage + Send + Sync>,
    pub relay_tokens: RelayTokens,
}

impl AppState {
    pub async fn new_with_config(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let http_client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(900))
            .timeout(Duration::from_secs(60))
            .user_agent("runscript-orchestrator/1.0")
            .build()?;

        let storage: Arc<dyn ObjectStorage + Send + Sync> = Arc::new(SupabaseStorage::new(
            config.supabase.clone(),
            http_client.clone(),
        ));
        let renderer: Arc<dyn RenderingService + Send + Sync> = Arc::new(RunScriptClient::new(
            http_client.clone(),
            config.runscript.clone(),
        ));
        let catalog = load_catalog(&config)?;
        log::info!(
            "Loaded {} template(s): {}",
            catalog.ids().len(),
            catalog.ids().join(", ")
        );

        let state = Self::new_with_services(
            renderer,
            storage,
            catalog,
            config.orchestrator.clone(),
            config.delivery_mode,
            config.public_base_url.as_deref(),
            config.relay_token_ttl,
        )?;

        // Spawn background eviction of finished jobs
        let registry = state.orchestrator.registry().clone();
        let retention = config.job_retention;
        tokio::spawn(async move {
            start_eviction_worker(registry, retention, EVICTION_SWEEP_INTERVAL).await;
        });

        Ok(state)
    }

    /// Wire the orchestrator around already-built services. Relay mode needs
    /// `public_base_url` to build callback URLs; direct mode ignores it.
    pub fn new_with_services(
        renderer: Arc<dyn RenderingService + Send + Sync>,
        storage: Arc<dyn ObjectStorage + Send + Sync>,
        catalog: TemplateCatalog,
        settings: OrchestratorSettings,
        delivery_mode: DeliveryMode,
        public_base_url: Option<&str>,
        relay_token_ttl: Duration,
    ) -> Result<Self, ConfigError> {
        let relay_tokens = RelayTokens::new(relay_token_ttl);
        let delivery: Arc<dyn OutputDelivery + Send + Sync> = match delivery_mode {
            DeliveryMode::Direct => Arc::new(DirectWriteDelivery::new(
                storage.clone(),
                settings.poll.total() + Duration::from_secs(600),
            )),
            DeliveryMode::Relay => {
                let base_url = public_base_url
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(ConfigError::Missing("PUBLIC_BASE_URL"))?;
                Arc::new(RelayDelivery::new(relay_tokens.clone(), base_url))
            }
        };

        let orchestrator = JobOrchestrator::new(renderer, storage.clone(), delivery, catalog, settings);

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            storage,
            relay_tokens,
        })
    }
}

fn load_catalog(config: &AppConfig) -> Result<TemplateCatalog, TemplateError> {
    match &config.templates_file {
        Some(path) => {
            log::info!("Loading template catalog from {}", path.display());
            TemplateCatalog::from_json_file(path)
        }
        None => Ok(TemplateCatalog::builtin()),
    }
}

use actix_cors::Cors;
use actix_web::middleware::Compress;
use actix_web::{http::header, web, App, HttpServer};
use actix_web_prometheus::PrometheusMetricsBuilder;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod config;
pub mod delivery;
pub mod generation;
pub mod runscript;
pub mod state;
pub mod storage;

pub use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Remote diagnostic (RunScript log or response body), verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: Option<String>) -> Self {
        self.details = details;
        self
    }

    pub fn not_found(message: &str) -> Self {
        Self::new("NotFound", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::generation::handlers::generate,
        crate::generation::handlers::job_status,
        crate::generation::handlers::evict_job,
        crate::generation::handlers::list_templates,
        crate::generation::handlers::connectivity_test,
        crate::delivery::handlers::receive_output
    ),
    components(
        schemas(
            generation::GenerationRequest,
            generation::JobState,
            generation::PublicStatus,
            generation::ArtifactLocation,
            generation::handlers::GenerateResponse,
            generation::handlers::StatusResponse,
            generation::handlers::ConnectivityResponse,
            generation::templates::TemplateSummary,
            generation::templates::TemplateField,
            generation::validation::ValidationError,
            delivery::handlers::ReceiveOutputResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Generation", description = "Document generation jobs on RunScript."),
        (name = "Delivery", description = "Relay endpoint for rendered output.")
    )
)]
pub struct ApiDoc;

/// Register every route on an app or test service.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(generation::config)
        .configure(delivery::handlers::config);
}

pub async fn run() -> std::io::Result<()> {
    dotenvy::dotenv().ok(); // Load .env file
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match config::AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration, check your environment or .env file: {}", e);
            std::process::exit(1);
        }
    };
    let bind_addr = config.bind_addr.clone();
    let port = config.port;
    log::info!(
        "Delivery mode {:?}, polling every {:?} up to {} time(s)",
        config.delivery_mode,
        config.orchestrator.poll.interval,
        config.orchestrator.poll.max_attempts
    );

    let app_state = match AppState::new_with_config(config).await {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            log::error!("Failed to initialise services: {}", e);
            std::process::exit(1);
        }
    };

    let prometheus = match PrometheusMetricsBuilder::new("runscript_orchestrator")
        .endpoint("/metrics")
        .build()
    {
        Ok(prometheus) => prometheus,
        Err(e) => {
            log::error!("Failed to create Prometheus metrics middleware: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Starting server at http://{}:{}", bind_addr, port);

    HttpServer::new(move || {
        let app_state = app_state.clone();
        let prometheus = prometheus.clone();
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                header::AUTHORIZATION,
                header::ACCEPT,
                header::CONTENT_TYPE,
            ])
            .max_age(3600);

        App::new()
            .wrap(Compress::default())
            .wrap(prometheus)
            .wrap(cors)
            .app_data(app_state)
            .configure(configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
    })
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind((bind_addr.as_str(), port))?
    .run()
    .await
}

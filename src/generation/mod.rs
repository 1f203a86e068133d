//! Document generation jobs: request validation, template catalog, and the
//! orchestrator that drives remote rendering jobs to a downloadable artifact.

pub mod error;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod templates;
pub mod validation;

pub use error::OrchestratorError;
pub use handlers::config;
pub use models::{ArtifactLocation, GenerationRequest, JobHandle, JobState, PublicStatus};
pub use orchestrator::{JobOrchestrator, OrchestratorSettings, PollBudget};
pub use registry::JobRegistry;
pub use templates::{TemplateCatalog, TemplateDefinition};

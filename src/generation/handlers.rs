use actix_web::{web, HttpResponse, Responder};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::error::OrchestratorError;
use super::models::{GenerationRequest, JobHandle, JobState, PublicStatus};
use super::templates::TemplateSummary;
use crate::state::AppState;
use crate::ErrorResponse;

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GenerateQuery {
    /// Drive the job inline and answer with the download URL.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub job_id: String,
    pub status: PublicStatus,
    pub status_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_id: String,
    pub status: PublicStatus,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Remote diagnostic, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub retryable: bool,
}

impl StatusResponse {
    fn from_handle(handle: &JobHandle) -> Self {
        let (error, details) = match handle.state {
            JobState::Failed => (Some("TerminalFailure"), handle.last_log.clone()),
            JobState::TimedOut => (Some("TimeoutFailure"), handle.last_log.clone()),
            JobState::ArtifactMissing => (Some("ArtifactMissingError"), None),
            _ => (None, None),
        };
        Self {
            job_id: handle.job_id.clone(),
            status: handle.state.public_status(),
            state: handle.state,
            download_url: None,
            error: error.map(str::to_string),
            details,
            retryable: handle.state == JobState::TimedOut,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityResponse {
    pub status: String,
    pub message: String,
    pub job_id: String,
}

pub(crate) fn error_response(err: &OrchestratorError) -> HttpResponse {
    let body = ErrorResponse::new(err.kind(), &err.to_string()).with_details(err.details());
    match err {
        OrchestratorError::Validation(_) => HttpResponse::BadRequest().json(body),
        OrchestratorError::UnknownJob(_) => HttpResponse::NotFound().json(body),
        OrchestratorError::NotSucceeded { .. } => HttpResponse::Conflict().json(body),
        OrchestratorError::Timeout { .. } => HttpResponse::GatewayTimeout().json(body),
        OrchestratorError::Submission { .. }
        | OrchestratorError::TerminalFailure { .. }
        | OrchestratorError::ArtifactMissing { .. }
        | OrchestratorError::Storage(_) => HttpResponse::BadGateway().json(body),
    }
}

#[utoipa::path(
    post,
    path = "/generate",
    tag = "Generation",
    params(GenerateQuery),
    request_body = GenerationRequest,
    responses(
        (status = 202, description = "Job submitted, poll the status URL", body = GenerateResponse),
        (status = 200, description = "Job finished (wait=true)", body = GenerateResponse),
        (status = 400, description = "Missing field or unknown template", body = ErrorResponse),
        (status = 502, description = "Rendering service rejected or failed the job", body = ErrorResponse),
        (status = 504, description = "Job still running when the poll budget ran out (wait=true)", body = ErrorResponse)
    )
)]
pub async fn generate(
    state: web::Data<AppState>,
    query: web::Query<GenerateQuery>,
    body: web::Json<GenerationRequest>,
) -> impl Responder {
    let request = body.into_inner();
    info!("Generation requested for template '{}'", request.template_id);

    let handle = match state.orchestrator.submit(request).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Generation request rejected: {}", e);
            return error_response(&e);
        }
    };
    let status_url = format!("/status/{}", handle.job_id);

    if query.wait {
        return match state.orchestrator.drive(&handle.job_id).await {
            Ok(location) => HttpResponse::Ok().json(GenerateResponse {
                job_id: handle.job_id,
                status: PublicStatus::Done,
                status_url,
                download_url: Some(location.url),
            }),
            Err(e) => {
                error!("Job {} did not produce an artifact: {}", handle.job_id, e);
                error_response(&e)
            }
        };
    }

    let orchestrator = state.orchestrator.clone();
    let job_id = handle.job_id.clone();
    tokio::spawn(async move {
        match orchestrator.drive(&job_id).await {
            Ok(location) => info!("Job {} delivered to '{}'", job_id, location.key),
            Err(e) => warn!("Job {} did not produce an artifact: {}", job_id, e),
        }
    });

    HttpResponse::Accepted().json(GenerateResponse {
        job_id: handle.job_id,
        status: PublicStatus::InProgress,
        status_url,
        download_url: None,
    })
}

#[utoipa::path(
    get,
    path = "/status/{job_id}",
    tag = "Generation",
    params(
        ("job_id" = String, Path, description = "RunScript job id")
    ),
    responses(
        (status = 200, description = "Current job status", body = StatusResponse),
        (status = 404, description = "Job not tracked", body = ErrorResponse),
        (status = 502, description = "Storage unavailable while signing the download URL", body = ErrorResponse)
    )
)]
pub async fn job_status(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let job_id = path.into_inner();
    let Some(handle) = state.orchestrator.job(&job_id) else {
        return HttpResponse::NotFound()
            .json(ErrorResponse::not_found(&format!("Job {job_id} is not tracked")));
    };

    // Succeeded and ready jobs get a freshly signed URL; timed-out jobs get one
    // more status check.
    let outcome = match handle.state {
        JobState::Succeeded | JobState::ArtifactReady => {
            Some(state.orchestrator.resolve_artifact(&job_id).await)
        }
        JobState::TimedOut => Some(state.orchestrator.refresh(&job_id).await),
        _ => None,
    };

    let handle = state.orchestrator.job(&job_id).unwrap_or(handle);
    let mut response = StatusResponse::from_handle(&handle);
    match outcome {
        Some(Ok(location)) => {
            response.status = PublicStatus::Done;
            response.download_url = Some(location.url);
        }
        Some(Err(e @ OrchestratorError::Storage(_))) => {
            error!("Could not sign download URL for job {}: {}", job_id, e);
            return error_response(&e);
        }
        Some(Err(e)) => {
            response.error = Some(e.kind().to_string());
            response.details = e.details().or(response.details);
            response.retryable = e.is_retryable();
        }
        None => {}
    }

    HttpResponse::Ok().json(response)
}

#[utoipa::path(
    delete,
    path = "/jobs/{job_id}",
    tag = "Generation",
    params(
        ("job_id" = String, Path, description = "RunScript job id")
    ),
    responses(
        (status = 204, description = "Job no longer tracked"),
        (status = 404, description = "Job not tracked", body = ErrorResponse)
    )
)]
pub async fn evict_job(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let job_id = path.into_inner();
    match state.orchestrator.evict(&job_id) {
        Some(_) => HttpResponse::NoContent().finish(),
        None => HttpResponse::NotFound()
            .json(ErrorResponse::not_found(&format!("Job {job_id} is not tracked"))),
    }
}

#[utoipa::path(
    get,
    path = "/templates",
    tag = "Generation",
    responses(
        (status = 200, description = "Available templates and their required fields", body = Vec<TemplateSummary>)
    )
)]
pub async fn list_templates(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.orchestrator.catalog().summaries())
}

#[utoipa::path(
    get,
    path = "/test",
    tag = "Generation",
    responses(
        (status = 200, description = "RunScript accepted a no-op job", body = ConnectivityResponse),
        (status = 502, description = "RunScript rejected the connectivity check", body = ErrorResponse)
    )
)]
pub async fn connectivity_test(state: web::Data<AppState>) -> impl Responder {
    info!("Testing RunScript connectivity");
    match state.orchestrator.check_connectivity().await {
        Ok(job_id) => HttpResponse::Ok().json(ConnectivityResponse {
            status: "OK".to_string(),
            message: "RunScript connection succeeded".to_string(),
            job_id,
        }),
        Err(e) => {
            error!("RunScript connectivity test failed: {}", e);
            error_response(&e)
        }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/generate").route(web::post().to(generate)))
        .service(web::resource("/status/{job_id}").route(web::get().to(job_status)))
        .service(web::resource("/jobs/{job_id}").route(web::delete().to(evict_job)))
        .service(web::resource("/templates").route(web::get().to(list_templates)))
        .service(web::resource("/test").route(web::get().to(connectivity_test)));
}

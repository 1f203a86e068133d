//! Relay endpoint the rendering service uploads output to when running in relay mode.

use actix_web::{web, HttpResponse, Responder};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::AppState;
use crate::ErrorResponse;

/// Accepts output files up to this size.
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024 * 1024;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ReceiveOutputResponse {
    pub status: String,
    pub key: String,
    pub bytes: usize,
}

#[utoipa::path(
    put,
    path = "/receive-output/{token}",
    tag = "Delivery",
    params(
        ("token" = String, Path, description = "Single-use delivery token from the job spec")
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Output stored", body = ReceiveOutputResponse),
        (status = 400, description = "Empty body", body = ErrorResponse),
        (status = 404, description = "Unknown, expired or already used token", body = ErrorResponse),
        (status = 502, description = "Object store rejected the write", body = ErrorResponse)
    )
)]
pub async fn receive_output(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> impl Responder {
    let token = path.into_inner();

    if !state.relay_tokens.is_live(&token).await {
        warn!("Relay delivery with unknown or used token rejected");
        return HttpResponse::NotFound()
            .json(ErrorResponse::not_found("Unknown or expired delivery token"));
    }

    // Checked before consuming so the service can retry with a body.
    if body.is_empty() {
        warn!("Relay delivery with empty body rejected");
        return HttpResponse::BadRequest().json(ErrorResponse::bad_request("Output body is empty"));
    }

    // A concurrent delivery may claim the token between the check and here.
    let Some(destination) = state.relay_tokens.consume(&token).await else {
        warn!("Relay delivery with unknown or used token rejected");
        return HttpResponse::NotFound()
            .json(ErrorResponse::not_found("Unknown or expired delivery token"));
    };

    match state
        .storage
        .upload_file(&destination.key, &body, &destination.content_type)
        .await
    {
        Ok(()) => {
            info!(
                "Relayed {} bytes of output to '{}'",
                body.len(),
                destination.key
            );
            HttpResponse::Ok().json(ReceiveOutputResponse {
                status: "stored".to_string(),
                key: destination.key,
                bytes: body.len(),
            })
        }
        Err(e) => {
            error!("Failed to relay output to '{}': {}", destination.key, e);
            // The write never happened, so the service may retry with the same token.
            state.relay_tokens.restore(token, destination).await;
            HttpResponse::BadGateway().json(
                ErrorResponse::new("StorageError", "Failed to store output")
                    .with_details(Some(e.to_string())),
            )
        }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/receive-output/{token}")
            .app_data(web::PayloadConfig::new(MAX_OUTPUT_BYTES))
            .route(web::put().to(receive_output)),
    );
}

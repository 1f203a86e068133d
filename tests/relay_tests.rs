mod common;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{http::StatusCode, test, web, App};
use common::{app_state, fast_settings, test_catalog, FakeRenderingService, MemoryStorage, Scripted};
use futures::future::join_all;
use runscript_orchestrator::config::ConfigError;
use runscript_orchestrator::delivery::DeliveryMode;
use runscript_orchestrator::generation::{GenerationRequest, JobState};
use runscript_orchestrator::{configure_routes, AppState};
use serde_json::Value;

const PDF: &[u8] = b"%PDF-1.7 relayed";

fn relay_setup() -> (Arc<FakeRenderingService>, Arc<MemoryStorage>, web::Data<AppState>) {
    let storage = Arc::new(MemoryStorage::new());
    let renderer = Arc::new(FakeRenderingService::new(
        "job-relay",
        &[Scripted::Status("running"), Scripted::Status("complete")],
    ));
    let state = app_state(renderer.clone(), storage.clone(), DeliveryMode::Relay);
    (renderer, storage, web::Data::new(state))
}

#[actix_web::test]
async fn test_relay_stores_output_and_consumes_token() {
    // Arrange
    let (_renderer, storage, state) = relay_setup();
    let token = state.relay_tokens.issue("certificates/alex-doe.pdf").await;
    let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;

    // Act
    let first = test::TestRequest::put()
        .uri(&format!("/receive-output/{token}"))
        .set_payload(PDF)
        .to_request();
    let first = test::call_service(&app, first).await;
    let first_status = first.status();
    let body: Value = test::read_body_json(first).await;

    let replay = test::TestRequest::put()
        .uri(&format!("/receive-output/{token}"))
        .set_payload(PDF)
        .to_request();
    let replay = test::call_service(&app, replay).await;

    // Assert
    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(body["status"], "stored");
    assert_eq!(body["key"], "certificates/alex-doe.pdf");
    assert_eq!(body["bytes"], PDF.len());
    assert_eq!(replay.status(), StatusCode::NOT_FOUND, "tokens are single-use");

    let (data, content_type) = storage.file("certificates/alex-doe.pdf").unwrap();
    assert_eq!(data, PDF);
    assert_eq!(content_type, "application/pdf");
    assert_eq!(storage.uploads(), 1);
}

#[actix_web::test]
async fn test_relay_rejects_unknown_token() {
    let (_renderer, storage, state) = relay_setup();
    let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;

    let req = test::TestRequest::put()
        .uri("/receive-output/not-a-token")
        .set_payload(PDF)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(storage.uploads(), 0);
}

#[actix_web::test]
async fn test_relay_empty_body_keeps_token() {
    let (_renderer, storage, state) = relay_setup();
    let token = state.relay_tokens.issue("certificates/alex-doe.pdf").await;
    let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;

    let req = test::TestRequest::put()
        .uri(&format!("/receive-output/{token}"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(state.relay_tokens.is_live(&token).await);
    assert_eq!(storage.uploads(), 0);
}

#[actix_web::test]
async fn test_relay_empty_body_with_invalid_token_is_not_found() {
    // Arrange
    let (_renderer, storage, state) = relay_setup();
    let token = state.relay_tokens.issue("certificates/alex-doe.pdf").await;
    let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;
    let stored = test::TestRequest::put()
        .uri(&format!("/receive-output/{token}"))
        .set_payload(PDF)
        .to_request();
    test::call_service(&app, stored).await;

    // Act
    let unknown = test::TestRequest::put()
        .uri("/receive-output/not-a-token")
        .to_request();
    let unknown = test::call_service(&app, unknown).await;
    let used = test::TestRequest::put()
        .uri(&format!("/receive-output/{token}"))
        .to_request();
    let used = test::call_service(&app, used).await;

    // Assert
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(used.status(), StatusCode::NOT_FOUND);
    assert_eq!(storage.uploads(), 1);
}

#[actix_web::test]
async fn test_relay_storage_failure_restores_token() {
    // Arrange
    let (_renderer, storage, state) = relay_setup();
    let token = state.relay_tokens.issue("certificates/alex-doe.pdf").await;
    let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;
    storage.fail_uploads(true);

    // Act
    let failed = test::TestRequest::put()
        .uri(&format!("/receive-output/{token}"))
        .set_payload(PDF)
        .to_request();
    let failed = test::call_service(&app, failed).await;
    let failed_status = failed.status();
    let body: Value = test::read_body_json(failed).await;

    storage.fail_uploads(false);
    let retried = test::TestRequest::put()
        .uri(&format!("/receive-output/{token}"))
        .set_payload(PDF)
        .to_request();
    let retried = test::call_service(&app, retried).await;

    // Assert
    assert_eq!(failed_status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "StorageError");
    assert_eq!(retried.status(), StatusCode::OK, "token should survive a failed write");
    assert_eq!(storage.uploads(), 1);
}

#[actix_web::test]
async fn test_concurrent_deliveries_with_one_token_store_once() {
    // Arrange
    let (_renderer, storage, state) = relay_setup();
    let token = state.relay_tokens.issue("certificates/alex-doe.pdf").await;
    let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;

    // Act
    let calls = (0..8).map(|_| {
        let req = test::TestRequest::put()
            .uri(&format!("/receive-output/{token}"))
            .set_payload(PDF)
            .to_request();
        test::call_service(&app, req)
    });
    let responses = join_all(calls).await;

    // Assert
    let ok = responses
        .iter()
        .filter(|resp| resp.status() == StatusCode::OK)
        .count();
    let rejected = responses
        .iter()
        .filter(|resp| resp.status() == StatusCode::NOT_FOUND)
        .count();
    assert_eq!(ok, 1, "exactly one delivery may win");
    assert_eq!(rejected, 7);
    assert_eq!(storage.uploads(), 1);
}

#[actix_web::test]
async fn test_relay_job_end_to_end() {
    // Arrange
    let (renderer, storage, state) = relay_setup();
    let app = test::init_service(App::new().app_data(state.clone()).configure(configure_routes)).await;
    let request = GenerationRequest::new("T1")
        .with_field("name", "Alex Doe")
        .with_field("date", "2024-05-01");
    let handle = state.orchestrator.submit(request).await.unwrap();

    // Act: the service uploads to the href it was handed
    let href = renderer.last_output_href().unwrap();
    let path = href.strip_prefix(common::PUBLIC_BASE_URL).unwrap().to_string();
    let req = test::TestRequest::put()
        .uri(&path)
        .set_payload(PDF)
        .to_request();
    let upload = test::call_service(&app, req).await;
    let location = state.orchestrator.drive(&handle.job_id).await;

    // Assert
    assert_eq!(upload.status(), StatusCode::OK);
    let location = location.expect("relayed artifact should resolve");
    assert_eq!(location.key, handle.output_key);
    assert!(storage.file(&handle.output_key).is_some());
    assert_eq!(
        state.orchestrator.job(&handle.job_id).unwrap().state,
        JobState::ArtifactReady
    );
}

#[::core::prelude::v1::test]
fn test_relay_mode_requires_public_base_url() {
    for base_url in [None, Some("  ")] {
        let result = AppState::new_with_services(
            Arc::new(FakeRenderingService::new("job-relay", &[])),
            Arc::new(MemoryStorage::new()),
            test_catalog(),
            fast_settings(),
            DeliveryMode::Relay,
            base_url,
            Duration::from_secs(60),
        );

        assert!(
            matches!(result, Err(ConfigError::Missing("PUBLIC_BASE_URL"))),
            "relay mode built without a base URL ({base_url:?})"
        );
    }
}

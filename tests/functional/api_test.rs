//! Functional tests for the HTTP surface

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use imagegen_relay::config::{BackendType, Settings};
use imagegen_relay::gateway::Relay;
use imagegen_relay::response::OutputMode;
use imagegen_relay::{api, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_app(server: &MockServer, output: OutputMode) -> Router {
    let mut settings = Settings::default();
    settings.backend.kind = BackendType::SdWebui;
    settings.backend.endpoint = Some(server.uri());
    settings.prompt.max_words = 4;
    settings.dispatch.output = output;
    let state = Arc::new(AppState {
        relay: Relay::new(settings).unwrap(),
    });
    api::create_router(state)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let server = MockServer::start().await;
    let app = create_test_app(&server, OutputMode::Default);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "sd-webui");
    assert_eq!(body["in_flight"], 0);
}

#[tokio::test]
async fn test_generate_returns_image_and_summary() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"images":["aW1n"]}"#))
        .expect(1)
        .mount(&server)
        .await;
    let app = create_test_app(&server, OutputMode::Default);

    let response = app
        .oneshot(post_json(
            "/v1/generate",
            json!({ "scope": "room", "prompt": "Cat", "options": { "seed": 11 } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["image_base64"], "aW1n");
    assert_eq!(body["seed"], 11);
    assert_eq!(body["sanitized_prompt"], "cat");
    assert_eq!(body["summary"][0], "seed = 11");
}

#[tokio::test]
async fn test_minimal_output_has_no_summary() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"images":["aW1n"]}"#))
        .mount(&server)
        .await;
    let app = create_test_app(&server, OutputMode::Minimal);

    let response = app
        .oneshot(post_json("/v1/generate", json!({ "prompt": "cat" })))
        .await
        .unwrap();

    let body = read_json(response).await;
    assert_eq!(body["summary"], json!([]));
}

#[tokio::test]
async fn test_sanitation_error_carries_key() {
    let server = MockServer::start().await;
    let app = create_test_app(&server, OutputMode::Default);

    let response = app
        .oneshot(post_json("/v1/generate", json!({ "prompt": "a, b, c, d, e" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert_eq!(body["error"]["code"], "too-many-words");
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_unreadable_image_rejected() {
    let server = MockServer::start().await;
    let app = create_test_app(&server, OutputMode::Default);

    let response = app
        .oneshot(post_json(
            "/v1/generate",
            json!({ "prompt": "cat", "image": "not base64 at all!" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert_eq!(body["error"]["code"], "download-error");
}

#[tokio::test]
async fn test_backend_failure_maps_to_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let app = create_test_app(&server, OutputMode::Default);

    let response = app
        .oneshot(post_json("/v1/generate", json!({ "prompt": "cat" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = read_json(response).await;
    assert_eq!(body["error"]["code"], "response-error");
}

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::json;
use time::OffsetDateTime;
use tower::util::ServiceExt;

use gemini_proxy::completion::ModelListResponse;

use common::{send_json, send_raw, TestApp};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_reports_ok() {
    let test_app = TestApp::without_cli();
    let before = OffsetDateTime::now_utc().unix_timestamp();
    let (status, body) = send_json(&test_app.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let timestamp = body["timestamp"].as_i64().expect("unix timestamp");
    assert!(timestamp >= before, "{timestamp}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn models_are_listed_on_both_paths() {
    let test_app = TestApp::without_cli();
    let (status, body) = send_json(&test_app.app, Method::GET, "/v1/models", None).await;
    assert_eq!(status, StatusCode::OK);
    let models: ModelListResponse = serde_json::from_value(body.clone()).expect("model list");
    insta::assert_json_snapshot!(models, @r###"
    {
      "object": "list",
      "data": [
        {
          "id": "gemini-local",
          "object": "model",
          "owned_by": "local"
        },
        {
          "id": "gemini-2.5-pro-preview-06-05",
          "object": "model",
          "owned_by": "local"
        }
      ]
    }
    "###);

    let (status, legacy) = send_json(&test_app.app, Method::GET, "/models", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(legacy, body);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_routes_return_json_404() {
    let test_app = TestApp::without_cli();
    let (status, body) = send_json(&test_app.app, Method::GET, "/v1/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "not_found_error");
    assert_eq!(body["error"]["code"], 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_bodies_are_rejected() {
    let test_app = TestApp::without_cli();
    let cases = [
        "{",
        "",
        "[]",
        r#"{"messages": [{"role": "wizard", "content": "hi"}]}"#,
        r#"{"messages": [{"role": "user"}]}"#,
        r#"{"prompt": "hi", "stream": "yes"}"#,
        r#"{"prompt": "hi", "model": "no spaces allowed"}"#,
    ];
    for body in cases {
        let (status, _, text) =
            send_raw(&test_app.app, Method::POST, "/v1/chat/completions", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}: {text}");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json error body");
        assert_eq!(value["error"]["type"], "invalid_request_error", "{body}");
        assert_eq!(value["error"]["code"], 400);
        assert_eq!(value["detail"], value["error"]["message"]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn prompt_validation_happens_before_the_cli_runs() {
    let test_app = TestApp::without_cli();

    let (status, body) =
        send_json(&test_app.app, Method::POST, "/v1/chat/completions", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "No messages or prompt provided");

    let (status, body) = send_json(
        &test_app.app,
        Method::POST,
        "/chat/completions",
        Some(json!({"prompt": " \u{0001} "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Prompt cannot be empty");

    let (status, body) = send_json(
        &test_app.app,
        Method::POST,
        "/v1/chat/completions",
        Some(json!({"prompt": "x".repeat(10_001)})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Prompt too long (max 10000 characters)");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_cli_is_a_server_error() {
    let test_app = TestApp::without_cli();
    let (status, body) = send_json(
        &test_app.app,
        Method::POST,
        "/v1/chat/completions",
        Some(json!({"messages": [{"role": "user", "content": "hi"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["type"], "executable_not_found");
    assert_eq!(body["error"]["code"], 500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cors_preflight_mirrors_origin_with_credentials() {
    let test_app = TestApp::without_cli();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/v1/chat/completions")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .expect("request");
    let response = test_app
        .app
        .clone()
        .oneshot(request)
        .await
        .expect("request handled");

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|value| value.to_str().ok()),
        Some("http://localhost:3000")
    );
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .and_then(|value| value.to_str().ok()),
        Some("true")
    );
}

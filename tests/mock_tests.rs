//! Mock-based end-to-end tests.
//!
//! These tests drive the full router with wiremock upstreams: no real
//! inference servers, no coordination store (the in-memory strategies
//! keep working without one).

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use llm_router_rust::api::{build_router, AppState};
use llm_router_rust::core::{AppConfig, ModelCatalog};
use llm_router_rust::services::{HookRegistry, PromptStore, ProviderChooser};
use llm_router_rust::services::strategies::build_strategy;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Write the prompt templates the builtin endpoints resolve at runtime.
fn prompt_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("builtin/system/en");
    std::fs::create_dir_all(&base).unwrap();
    std::fs::write(
        base.join("chat-conversation-simple.txt"),
        "You are a helpful assistant.",
    )
    .unwrap();
    std::fs::write(base.join("batch-file-summaries.txt"), "Summarize each file.").unwrap();
    std::fs::write(base.join("translate-to-pl.txt"), "Translate to Polish.").unwrap();
    dir
}

fn catalog_for(uri: &str, api_type: &str) -> String {
    format!(
        r#"{{
            "active_models": {{"llm": ["m"]}},
            "llm": {{
                "m": {{"providers": [
                    {{"id": "p1", "api_host": "{}", "api_type": "{}", "input_size": 4096}}
                ]}}
            }}
        }}"#,
        uri, api_type
    )
}

fn build_test_app(catalog_json: &str, prompts_dir: &std::path::Path, strategy: &str) -> Router {
    let config = AppConfig::for_tests();
    let catalog = Arc::new(ModelCatalog::from_json_str(catalog_json).unwrap());
    let strategy = build_strategy(strategy, None, config.request_timeout_secs).unwrap();
    let chooser = Arc::new(ProviderChooser::new(catalog.clone(), strategy, None));

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.external_timeout_secs))
        .build()
        .unwrap();

    let state = Arc::new(AppState::new(
        config,
        catalog,
        chooser,
        http_client,
        PromptStore::new(prompts_dir),
        HookRegistry::new(),
    ));
    build_router(state).unwrap()
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn chat_completion_body(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "m",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
    })
}

#[tokio::test]
async fn test_openai_passthrough_relays_body_verbatim() {
    let mock_server = MockServer::start().await;
    let upstream_body = chat_completion_body("hello there");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_body.clone()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/v1/chat/completions",
        json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, upstream_body);

    // The relayed request reaches the upstream with the identical body.
    let requests = mock_server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["model"], "m");
    assert_eq!(sent["messages"][0]["content"], "hi");
    assert_eq!(sent["stream"], false);
}

#[tokio::test]
async fn test_bearer_token_forwarded_upstream() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("ok")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let catalog = format!(
        r#"{{
            "active_models": {{"llm": ["m"]}},
            "llm": {{"m": {{"providers": [
                {{"id": "p1", "api_host": "{}", "api_type": "vllm",
                 "api_token": "secret-token"}}
            ]}}}}
        }}"#,
        mock_server.uri()
    );

    let prompts = prompt_tree();
    let app = build_test_app(&catalog, prompts.path(), "balanced");

    let (status, _) = post_json(
        &app,
        "/v1/chat/completions",
        json!({"model": "m", "messages": [], "stream": false}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_system_prompt_injection() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("sure")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/api/conversation_with_model",
        json!({
            "model_name": "m",
            "user_last_statement": "hi",
            "language": "en"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], true);
    assert_eq!(body["body"]["response"], "sure");
    assert!(body["body"]["generation_time"].is_number());

    let requests = mock_server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["model"], "m");
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][0]["content"], "You are a helpful assistant.");
    assert_eq!(sent["messages"][1]["role"], "user");
    assert_eq!(sent["messages"][1]["content"], "hi");
}

#[tokio::test]
async fn test_unsupported_language_is_rejected() {
    let mock_server = MockServer::start().await;
    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/api/conversation_with_model",
        json!({
            "model_name": "m",
            "user_last_statement": "hi",
            "language": "fr"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], false);
    assert_eq!(body["error"]["code"], "ValidationError");
}

#[tokio::test]
async fn test_multi_shot_batch_file_summaries() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body(
            "Summary: Looks fine.\nKey points:\n- first\n- second",
        )))
        .expect(2)
        .mount(&mock_server)
        .await;

    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/api/batch_file_summaries",
        json!({
            "model_name": "m",
            "language": "en",
            "files": [
                {"name": "a.txt", "content": "content of a"},
                {"name": "b.txt", "content": "content of b"}
            ]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], true);
    let items = body["body"]["response"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    // File order in the response equals request order.
    assert_eq!(items[0]["name"], "a.txt");
    assert_eq!(items[1]["name"], "b.txt");
    assert_eq!(items[0]["summary"], "Looks fine.");
    assert_eq!(items[0]["key_points"][0], "first");
    assert!(body["body"]["generation_time"].is_number());

    // One upstream call per file, each with [system, single-user-message].
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for (idx, expected) in ["content of a", "content of b"].iter().enumerate() {
        let sent: Value = serde_json::from_slice(&requests[idx].body).unwrap();
        let messages = sent["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], *expected);
    }
}

#[tokio::test]
async fn test_multi_shot_coerces_stream_to_false() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("jeden")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/api/translate",
        json!({
            "model_name": "m",
            "language": "en",
            "texts": ["one"],
            "stream": true
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"]["response"][0]["original"], "one");
    assert_eq!(body["body"]["response"][0]["translated"], "jeden");

    let requests = mock_server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["stream"], false);
}

#[tokio::test]
async fn test_balanced_selection_alternates_between_providers() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;
    for server in [&server_a, &server_b] {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("ok")))
            .mount(server)
            .await;
    }

    let catalog = format!(
        r#"{{
            "active_models": {{"llm": ["m"]}},
            "llm": {{"m": {{"providers": [
                {{"id": "A", "api_host": "{}", "api_type": "vllm"}},
                {{"id": "B", "api_host": "{}", "api_type": "vllm"}}
            ]}}}}
        }}"#,
        server_a.uri(),
        server_b.uri()
    );

    let prompts = prompt_tree();
    let app = build_test_app(&catalog, prompts.path(), "balanced");

    for _ in 0..4 {
        let (status, _) = post_json(
            &app,
            "/v1/chat/completions",
            json!({"model": "m", "messages": [], "stream": false}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // Selection order A, B, A, B: each upstream saw exactly two calls.
    assert_eq!(server_a.received_requests().await.unwrap().len(), 2);
    assert_eq!(server_b.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_weighted_selection_follows_weights() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;
    for server in [&server_a, &server_b] {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("ok")))
            .mount(server)
            .await;
    }

    let catalog = format!(
        r#"{{
            "active_models": {{"llm": ["m"]}},
            "llm": {{"m": {{"providers": [
                {{"id": "A", "api_host": "{}", "api_type": "vllm", "weight": 3.0}},
                {{"id": "B", "api_host": "{}", "api_type": "vllm", "weight": 1.0}}
            ]}}}}
        }}"#,
        server_a.uri(),
        server_b.uri()
    );

    let prompts = prompt_tree();
    let app = build_test_app(&catalog, prompts.path(), "weighted");

    for _ in 0..8 {
        let (status, _) = post_json(
            &app,
            "/v1/chat/completions",
            json!({"model": "m", "messages": [], "stream": false}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // 3:1 weights over 8 sequential requests.
    assert_eq!(server_a.received_requests().await.unwrap().len(), 6);
    assert_eq!(server_b.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_required_param() {
    let mock_server = MockServer::start().await;
    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/api/conversation_with_model",
        json!({"model_name": "m"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], false);
    assert_eq!(body["error"]["code"], "MissingParam");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("user_last_statement"));
}

#[tokio::test]
async fn test_unknown_model_returns_503() {
    let mock_server = MockServer::start().await;
    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/v1/chat/completions",
        json!({"model": "ghost", "messages": [], "stream": false}),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "NoProviderAvailable");
}

#[tokio::test]
async fn test_model_with_empty_providers_returns_503() {
    let mock_server = MockServer::start().await;
    let catalog = format!(
        r#"{{
            "active_models": {{"llm": ["m", "empty"]}},
            "llm": {{
                "m": {{"providers": [
                    {{"id": "p1", "api_host": "{}", "api_type": "vllm"}}
                ]}},
                "empty": {{"providers": []}}
            }}
        }}"#,
        mock_server.uri()
    );
    let prompts = prompt_tree();
    let app = build_test_app(&catalog, prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/v1/chat/completions",
        json!({"model": "empty", "messages": [], "stream": false}),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "NoProviderAvailable");
}

#[tokio::test]
async fn test_api_type_mismatch_returns_502() {
    let mock_server = MockServer::start().await;
    let prompts = prompt_tree();
    // Ollama-style endpoint, vllm provider.
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/api/chat",
        json!({"model": "m", "messages": [], "stream": false}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "ApiTypeMismatch");
}

#[tokio::test]
async fn test_upstream_500_maps_to_upstream_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .mount(&mock_server)
        .await;

    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/v1/chat/completions",
        json!({"model": "m", "messages": [], "stream": false}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["status"], false);
    assert_eq!(body["error"]["code"], "UpstreamError");
    assert_eq!(body["error"]["details"]["upstream_status"], 500);
}

#[tokio::test]
async fn test_upstream_4xx_relayed_for_simple_proxy() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "model not found"})),
        )
        .mount(&mock_server)
        .await;

    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/v1/chat/completions",
        json!({"model": "m", "messages": [], "stream": false}),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "model not found");
}

#[tokio::test]
async fn test_malformed_json_returns_400() {
    let mock_server = MockServer::start().await;
    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_content_type_returns_400() {
    let mock_server = MockServer::start().await;
    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "text/plain")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_streaming_passthrough_relays_sse_frames() {
    let mock_server = MockServer::start().await;
    let sse_body = "data: {\"choices\":[{\"delta\":{\"content\":\"he\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n\
                    data: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .mount(&mock_server)
        .await;

    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"model": "m", "messages": [], "stream": true}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(std::str::from_utf8(&bytes).unwrap(), sse_body);
}

#[tokio::test]
async fn test_ping_and_home() {
    let mock_server = MockServer::start().await;
    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = get_json(&app, "/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "pong");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(std::str::from_utf8(&bytes).unwrap(), "Ollama is running");
}

#[tokio::test]
async fn test_model_listings() {
    let mock_server = MockServer::start().await;
    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = get_json(&app, "/models").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["id"], "m");

    let (status, body) = get_json(&app, "/tags").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"][0]["name"], "m");

    let (status, body) = post_json(&app, "/api/v0/models", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], "m");
    assert_eq!(body["data"][0]["state"], "loaded");

    let (status, body) = get_json(&app, "/api/version").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_embeddings_passthrough() {
    let mock_server = MockServer::start().await;
    let upstream_body = json!({
        "object": "list",
        "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2]}],
        "model": "m",
        "usage": {"prompt_tokens": 2, "total_tokens": 2}
    });
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_body.clone()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "vllm"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/v1/embeddings",
        json!({"model": "m", "input": "hello"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, upstream_body);
}

#[tokio::test]
async fn test_ollama_chat_passthrough() {
    let mock_server = MockServer::start().await;
    let upstream_body = json!({
        "model": "m",
        "message": {"role": "assistant", "content": "hej"},
        "done": true
    });
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_body.clone()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let prompts = prompt_tree();
    let app = build_test_app(&catalog_for(&mock_server.uri(), "ollama"), prompts.path(), "balanced");

    let (status, body) = post_json(
        &app,
        "/api/chat",
        json!({"model": "m", "messages": [{"role": "user", "content": "hi"}], "stream": false}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, upstream_body);
}

//! Generation, streaming, and embedding endpoints.

mod common;

use axum::http::StatusCode;
use common::{body_json, body_text, build_test_app};
use llmops_core::instance::DeployRequest;
use llmops_runtime::testkit::ScriptedBackend;
use serde_json::json;

#[tokio::test]
async fn generate_returns_backend_text() {
    let app = build_test_app(ScriptedBackend::new());
    let id = app.running("gpt2").await;

    let response = app
        .post(
            &format!("/api/chat/{id}/generate"),
            json!({ "prompt": "hello", "max_tokens": 8 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["text"], "out:hello");
    assert_eq!(json["data"]["instance_id"], id.as_str());
}

#[tokio::test]
async fn generate_on_initializing_instance_is_409() {
    let app = build_test_app(
        ScriptedBackend::new().with_load_delay(std::time::Duration::from_secs(60)),
    );
    let inst = app.manager.deploy(DeployRequest::new("gpt2")).await.unwrap();

    let response = app
        .post(&format!("/api/chat/{}/generate", inst.id), json!({ "prompt": "hi" }))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "INVALID_STATE");
}

#[tokio::test]
async fn empty_prompt_is_400() {
    let app = build_test_app(ScriptedBackend::new());
    let id = app.running("gpt2").await;
    let response = app
        .post(&format!("/api/chat/{id}/generate"), json!({ "prompt": "  " }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn backend_failure_is_502() {
    let app = build_test_app(ScriptedBackend::new().failing_on("boom"));
    let id = app.running("gpt2").await;
    let response = app
        .post(&format!("/api/chat/{id}/generate"), json!({ "prompt": "boom" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn stream_emits_chunks_then_done() {
    let app = build_test_app(ScriptedBackend::new());
    let id = app.running("gpt2").await;

    let response = app
        .post(&format!("/api/chat/{id}/stream"), json!({ "prompt": "a b c" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = body_text(response).await;
    let data: Vec<&str> = body
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .collect();
    assert_eq!(data, ["out:a ", "b ", "c", "[DONE]"]);
    assert!(body.contains("event: done"));
}

#[tokio::test]
async fn encode_requires_embedding_instance() {
    let app = build_test_app(ScriptedBackend::new());
    let chat = app.running("gpt2").await;
    let embed = app.running("BAAI/bge-small-en-v1.5").await;

    let ok = body_json(
        app.post(&format!("/api/embeddings/{embed}"), json!({ "text": "hello" }))
            .await,
    )
    .await;
    assert_eq!(ok["data"]["dimensions"], 3);

    let wrong = app
        .post(&format!("/api/embeddings/{chat}"), json!({ "text": "hello" }))
        .await;
    assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);
}

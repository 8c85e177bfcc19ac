//! Instance lifecycle endpoints.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_json, build_test_app};
use llmops_core::instance::InstanceStatus;
use llmops_runtime::testkit::{wait_for_status, ScriptedBackend};
use serde_json::json;

#[tokio::test]
async fn deploy_returns_201_and_instance_becomes_running() {
    let app = build_test_app(ScriptedBackend::new());

    let response = app
        .post("/api/models", json!({ "model_name": "openai-community/gpt2" }))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    let id = json["data"]["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("gpt2-"));
    assert_eq!(json["data"]["kind"], "chat");

    wait_for_status(&app.manager, &id, InstanceStatus::Running, Duration::from_secs(5)).await;
    let json = body_json(app.get(&format!("/api/models/{id}")).await).await;
    assert_eq!(json["data"]["status"], "RUNNING");
}

#[tokio::test]
async fn deploy_with_empty_name_is_400() {
    let app = build_test_app(ScriptedBackend::new());
    let response = app.post("/api/models", json!({ "model_name": "" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn deploy_beyond_limit_is_429() {
    let app = build_test_app(ScriptedBackend::new());
    for i in 0..app.manager.config().max_instances {
        let response = app.post("/api/models", json!({ "model_name": format!("m{i}") })).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    let response = app.post("/api/models", json!({ "model_name": "one-too-many" })).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(response).await["code"], "RESOURCE_LIMIT");
}

#[tokio::test]
async fn unknown_instance_is_404() {
    let app = build_test_app(ScriptedBackend::new());
    for response in [
        app.get("/api/models/ghost").await,
        app.post("/api/models/ghost/stop", json!({})).await,
        app.delete("/api/models/ghost").await,
        app.get("/api/models/ghost/logs").await,
    ] {
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn stop_remove_and_logs() {
    let app = build_test_app(ScriptedBackend::new());
    let id = app.running("gpt2").await;

    let logs = body_json(app.get(&format!("/api/models/{id}/logs?lines=2")).await).await;
    assert_eq!(logs["data"].as_array().unwrap().len(), 2);

    let stopped = body_json(app.post(&format!("/api/models/{id}/stop"), json!({})).await).await;
    assert_eq!(stopped["data"]["status"], "STOPPED");

    let again = app.post(&format!("/api/models/{id}/stop"), json!({})).await;
    assert_eq!(again.status(), StatusCode::OK);

    let removed = app.delete(&format!("/api/models/{id}")).await;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);
    let removed_again = app.delete(&format!("/api/models/{id}")).await;
    assert_eq!(removed_again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_and_available_filter_by_kind() {
    let app = build_test_app(ScriptedBackend::new());
    let chat = app.running("gpt2").await;
    let embed = app.running("sentence-transformers/all-MiniLM-L6-v2").await;

    let all = body_json(app.get("/api/models").await).await;
    assert_eq!(all["data"].as_array().unwrap().len(), 2);

    let embeddings = body_json(app.get("/api/models?kind=embedding").await).await;
    assert_eq!(embeddings["data"][0]["id"], embed.as_str());

    app.manager.stop(&chat).await.unwrap();
    let available = body_json(app.get("/api/models/available").await).await;
    let ids: Vec<&str> = available["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, [embed.as_str()]);
}

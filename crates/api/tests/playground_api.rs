//! Workflow playground endpoints.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app};
use llmops_runtime::testkit::ScriptedBackend;
use serde_json::{json, Value};

fn workflow(first: &str, second: &str) -> Value {
    json!({
        "nodes": [
            { "id": "n1", "instance_id": first, "prompt_template": "{input}" },
            { "id": "n2", "instance_id": second, "prompt_template": "Given {n1}, recommend" }
        ],
        "edges": [{ "source": "n1", "target": "n2" }]
    })
}

#[tokio::test]
async fn order_returns_layers() {
    let app = build_test_app(ScriptedBackend::new());
    let json = body_json(app.post("/api/playground/order", workflow("a", "b")).await).await;
    assert_eq!(json["data"]["valid"], true);
    assert_eq!(json["data"]["layers"], json!([["n1"], ["n2"]]));
}

#[tokio::test]
async fn order_reports_cycle() {
    let app = build_test_app(ScriptedBackend::new());
    let mut wf = workflow("a", "b");
    wf["edges"]
        .as_array_mut()
        .unwrap()
        .push(json!({ "source": "n2", "target": "n1" }));

    let json = body_json(app.post("/api/playground/order", wf).await).await;
    assert_eq!(json["data"]["valid"], false);
    assert!(json["data"]["error"].as_str().unwrap().contains("cycle"));
}

#[tokio::test]
async fn validate_flags_instances_that_are_not_running() {
    let app = build_test_app(ScriptedBackend::new());
    let a = app.running("gpt2").await;

    let json = body_json(app.post("/api/playground/validate", workflow(&a, "ghost")).await).await;
    assert_eq!(json["data"]["valid"], true);
    assert_eq!(json["data"]["ready"], false);
    assert_eq!(json["data"]["unavailable"][0]["node_id"], "n2");
}

#[tokio::test]
async fn execute_runs_workflow() {
    let app = build_test_app(ScriptedBackend::new());
    let a = app.running("gpt2").await;
    let b = app.running("distilgpt2").await;

    let response = app
        .post(
            "/api/playground/execute",
            json!({ "workflow": workflow(&a, &b), "input": "cats" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let data = &json["data"];
    assert_eq!(data["success"], true);
    assert_eq!(data["layers"], 2);
    assert_eq!(data["nodes"]["n1"]["output"], "out:cats");
    assert_eq!(data["nodes"]["n2"]["output"], "out:Given out:cats, recommend");
    assert_eq!(app.backend.prompts(), ["cats", "Given out:cats, recommend"]);
}

#[tokio::test]
async fn execute_empty_workflow_reports_failure() {
    let app = build_test_app(ScriptedBackend::new());
    let json = body_json(
        app.post(
            "/api/playground/execute",
            json!({ "workflow": { "nodes": [], "edges": [] }, "input": "x" }),
        )
        .await,
    )
    .await;
    assert_eq!(json["data"]["success"], false);
    assert_eq!(json["data"]["error"], "Workflow has no nodes");
}

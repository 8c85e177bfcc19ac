#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use llmops_api::config::ServerConfig;
use llmops_api::state::AppState;
use llmops_core::instance::InstanceStatus;
use llmops_pipeline::{ExecutorConfig, WorkflowExecutor};
use llmops_runtime::testkit::{fast_config, scripted_provider, wait_for_status, ScriptedBackend};
use llmops_runtime::InstanceManager;
use serde_json::Value;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
    }
}

/// App wired to an in-process manager whose instances all share `backend`.
pub struct TestApp {
    pub router: Router,
    pub manager: Arc<InstanceManager>,
    pub backend: Arc<ScriptedBackend>,
}

pub fn build_test_app(backend: ScriptedBackend) -> TestApp {
    let backend = Arc::new(backend);
    let manager = InstanceManager::new(
        fast_config(),
        Arc::new(scripted_provider(Arc::clone(&backend))),
    );
    let executor = Arc::new(WorkflowExecutor::new(
        manager.clone(),
        ExecutorConfig::default(),
    ));
    let state = AppState {
        config: Arc::new(test_config()),
        manager: Arc::clone(&manager),
        executor,
    };
    TestApp {
        router: llmops_api::build_app(state),
        manager,
        backend,
    }
}

impl TestApp {
    /// Deploy through the manager and wait for RUNNING. Returns the id.
    pub async fn running(&self, model_name: &str) -> String {
        let instance = self
            .manager
            .deploy(llmops_core::instance::DeployRequest::new(model_name))
            .await
            .unwrap();
        wait_for_status(
            &self.manager,
            &instance.id,
            InstanceStatus::Running,
            Duration::from_secs(5),
        )
        .await;
        instance.id
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        send(self.router.clone(), Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> Response<Body> {
        send(self.router.clone(), Method::POST, uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        send(self.router.clone(), Method::DELETE, uri, None).await
    }
}

pub async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

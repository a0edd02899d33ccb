//! HTTP surface: health/readiness, heartbeat, info, task and objective CRUD,
//! and the inbound chat endpoint, all JSON-over-HTTP via axum.

pub mod error;
pub mod routes;
pub mod state;

pub use state::{AppState, ChatTurn, InfoConfig, MessageGateway};

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Builds the full router, wired onto `state`. The caller owns binding and
/// graceful shutdown (see `agentrt-runtime`).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz))
        .route("/api/v1/heartbeat", get(routes::heartbeat::get_heartbeat))
        .route("/api/v1/info", get(routes::info::get_info))
        .route(
            "/api/v1/tasks",
            get(routes::tasks::get_tasks).post(routes::tasks::create_task),
        )
        .route("/api/v1/tasks/retry", post(routes::tasks::retry_task))
        .route(
            "/api/v1/objectives",
            get(routes::objectives::get_objectives).post(routes::objectives::create_objective),
        )
        .route("/api/v1/objectives/update", post(routes::objectives::update_objective))
        .route("/api/v1/objectives/active", post(routes::objectives::set_objective_active))
        .route("/api/v1/objectives/delete", post(routes::objectives::delete_objective))
        .route("/api/v1/chat", post(routes::chat::post_chat))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrt_engine::Engine;
    use agentrt_shared::{Task, TaskKind};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct NoopExecutor;
    #[async_trait::async_trait]
    impl agentrt_engine::TaskExecutor for NoopExecutor {
        async fn execute(&self, _task: &Task) -> Result<agentrt_engine::ExecutionResult, String> {
            Ok(agentrt_engine::ExecutionResult::default())
        }
    }

    struct NoopObserver;
    #[async_trait::async_trait]
    impl agentrt_engine::TaskObserver for NoopObserver {
        async fn on_task_queued(&self, _task: &Task) {}
        async fn on_task_started(&self, _task: &Task, _worker_id: i64) {}
        async fn on_task_completed(
            &self,
            _task: &Task,
            _worker_id: i64,
            _result: &agentrt_engine::ExecutionResult,
        ) {
        }
        async fn on_task_failed(&self, _task: &Task, _worker_id: i64, _err: &str) {}
    }

    async fn test_state() -> AppState {
        let store: Arc<dyn agentrt_store::MetaStore> =
            Arc::new(agentrt_store::SqliteMetaStore::connect_in_memory().await.unwrap());
        let engine = Engine::new(1);
        engine.set_executor(Arc::new(NoopExecutor));
        engine.set_observer(Arc::new(NoopObserver));
        let workspace_root = tempfile::tempdir().unwrap().into_path();
        let mut state = AppState::new(
            store,
            engine,
            workspace_root,
            InfoConfig {
                name: "agentrt".to_string(),
                environment: "test".to_string(),
                public_host: None,
                admin_host: None,
                mcp_summary: None,
            },
        );
        state.mark_ready();
        state
    }

    #[tokio::test]
    async fn healthz_returns_ok_without_readiness() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_is_503_before_mark_ready() {
        let store: Arc<dyn agentrt_store::MetaStore> =
            Arc::new(agentrt_store::SqliteMetaStore::connect_in_memory().await.unwrap());
        let engine = Engine::new(1);
        engine.set_executor(Arc::new(NoopExecutor));
        engine.set_observer(Arc::new(NoopObserver));
        let workspace_root = tempfile::tempdir().unwrap().into_path();
        let state = AppState::new(
            store,
            engine,
            workspace_root,
            InfoConfig {
                name: "agentrt".to_string(),
                environment: "test".to_string(),
                public_host: None,
                admin_host: None,
                mcp_summary: None,
            },
        );
        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn create_task_then_fetch_by_id() {
        let app = build_router(test_state().await);
        let body = serde_json::json!({
            "workspace_id": "ws1",
            "context_id": "chan-1",
            "title": "Do thing",
            "prompt": "echo hi"
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let task_id = parsed["task_id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/tasks?id={task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let fetched: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(fetched["id"], task_id);
        assert_eq!(fetched["status"], "queued");
    }

    #[tokio::test]
    async fn retry_of_queued_task_is_rejected() {
        let app = build_router(test_state().await);
        let body = serde_json::json!({
            "workspace_id": "ws1",
            "context_id": "chan-1",
            "title": "Do thing",
            "prompt": "echo hi"
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/tasks")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let task_id = parsed["task_id"].as_str().unwrap().to_string();

        let retry_body = serde_json::json!({ "task_id": task_id });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/tasks/retry")
                    .header("content-type", "application/json")
                    .body(Body::from(retry_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["error"], "only failed tasks can be retried");
    }

    #[tokio::test]
    async fn chat_without_gateway_is_503() {
        let app = build_router(test_state().await);
        let body = serde_json::json!({
            "connector": "telegram",
            "external_id": "120",
            "text": "hello"
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

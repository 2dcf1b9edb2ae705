//! REST API server — expose the action surface over HTTP.
//!
//! Endpoints:
//! - POST /v1/action — Run one action (`{"action": "...", ...}`)
//! - GET  /v1/status — Metrics and orchestration settings
//! - GET  /v1/health — Health check

use std::net::SocketAddr;

use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    middleware,
    response::Json,
    routing::{get, post},
};
use serde::Serialize;
use tracing::{debug, info};

use crate::middleware::logging_middleware;
use crate::service::{Action, ActionResponse, ActionService};

// ─── Response types ────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub status: String,
    pub upstream: String,
    pub metrics: serde_json::Value,
}

// ─── Handlers ──────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn status(State(service): State<ActionService>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
        upstream: service.orchestrator().upstream_name().to_string(),
        metrics: service.metrics().to_json(),
    })
}

async fn action(
    State(service): State<ActionService>,
    payload: Result<Json<Action>, JsonRejection>,
) -> Json<ActionResponse> {
    match payload {
        Ok(Json(action)) => {
            debug!(action = action.name(), "Dispatching action");
            Json(service.dispatch(action).await)
        }
        Err(rejection) => Json(service.reject(&rejection.body_text())),
    }
}

// ─── Server builder ────────────────────────────────────────

/// Build the API router.
pub fn build_router(service: ActionService) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/action", post(action))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(service)
}

/// Start the API server.
pub async fn start_server(service: ActionService, host: &str, port: u16) -> anyhow::Result<()> {
    let listener_task = service.spawn_metrics_listener();
    let app = build_router(service);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("🌐 API server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app).await;
    listener_task.abort();
    served?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hoverlate_core::cache::RequestKind;
    use hoverlate_core::clock::ManualClock;
    use hoverlate_core::error::UpstreamError;
    use hoverlate_core::orchestrator::{Orchestrator, OrchestratorOptions};
    use hoverlate_core::settings::Settings;
    use hoverlate_core::upstream::UpstreamClient;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::metrics::new_metrics;
    use crate::middleware::REQUEST_ID_HEADER;
    use crate::store::SqliteStore;

    struct Echo;

    #[async_trait]
    impl UpstreamClient for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            _api_key: &str,
            _model: &str,
            prompt: &str,
        ) -> std::result::Result<String, UpstreamError> {
            Ok(prompt.rsplit("\n\n").next().unwrap_or_default().to_uppercase())
        }
    }

    async fn spawn_server() -> String {
        spawn_server_with(Arc::new(Echo)).await.0
    }

    async fn spawn_server_with(upstream: Arc<dyn UpstreamClient>) -> (String, Arc<Orchestrator>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        Settings {
            api_key: Some("key".into()),
            ..Default::default()
        }
        .save(&*store)
        .await
        .unwrap();

        let orchestrator = Arc::new(Orchestrator::new(
            store,
            upstream,
            Arc::new(ManualClock::new(1_700_000_000_000)),
            OrchestratorOptions::default(),
        ));
        let service = ActionService::new(orchestrator.clone(), new_metrics());
        let app = build_router(service);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), orchestrator)
    }

    struct Sluggish;

    #[async_trait]
    impl UpstreamClient for Sluggish {
        fn name(&self) -> &str {
            "sluggish"
        }

        async fn generate(
            &self,
            _api_key: &str,
            _model: &str,
            _prompt: &str,
        ) -> std::result::Result<String, UpstreamError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok("Late hello".to_string())
        }
    }

    #[tokio::test]
    async fn test_action_over_http() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/v1/action", base))
            .json(&serde_json::json!({ "action": "translateSingle", "text": "hello" }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        assert!(resp.headers().contains_key(REQUEST_ID_HEADER));

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["translation"], "HELLO");
        assert_eq!(body["modelUsed"], "gemini-2.5-flash");
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();

        let health: serde_json::Value = client
            .get(format!("{}/v1/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let status: serde_json::Value = client
            .get(format!("{}/v1/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["upstream"], "echo");
        assert!(status["metrics"]["actions"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_action_is_error_shape() {
        let base = spawn_server().await;
        let client = reqwest::Client::new();
        let expected = serde_json::json!({ "error": "Invalid request: unknown or malformed action" });

        let body: serde_json::Value = client
            .post(format!("{}/v1/action", base))
            .json(&serde_json::json!({ "action": "formatDisk" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, expected);

        let body: serde_json::Value = client
            .post(format!("{}/v1/action", base))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, expected);
    }

    #[tokio::test]
    async fn test_disconnected_caller_still_caches_answer() {
        let (base, orchestrator) = spawn_server_with(Arc::new(Sluggish)).await;
        let impatient = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        let result = impatient
            .post(format!("{}/v1/action", base))
            .json(&serde_json::json!({ "action": "translateSingle", "text": "待って" }))
            .send()
            .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(800)).await;
        let entry = orchestrator
            .cache()
            .lookup(RequestKind::Translation, "待って")
            .await
            .unwrap();
        assert_eq!(entry.payload, "Late hello");
    }
}

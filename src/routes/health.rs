use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub store: ComponentHealth,
    pub queue: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

async fn probe<F, E>(check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    match check.await {
        Ok(()) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => ComponentHealth {
            status: "error".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

/// GET /health: job store and task queue connectivity.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = probe(state.store.health_check()).await;
    let queue = probe(state.queue.health_check()).await;

    let all_healthy = store.is_ok() && queue.is_ok();
    if !all_healthy {
        tracing::warn!(store = %store.status, queue = %queue.status, "Health check degraded");
    }

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { store, queue },
    };

    (status_code, Json(response))
}

/// GET /: service name and the available endpoints.
pub async fn service_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "submit": "POST /api/v1/analyses",
            "list": "GET /api/v1/analyses",
            "status": "GET /api/v1/analyses/{id}",
            "result": "GET /api/v1/analyses/{id}/result",
            "report": "GET /api/v1/analyses/{id}/report",
            "delete": "DELETE /api/v1/analyses/{id}",
            "queue": "GET /api/v1/queue/status",
            "health": "GET /health",
            "metrics": "GET /metrics"
        }
    }))
}

//! Liveness, readiness and metrics endpoints for `watch`

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use modelcast_core::ArtifactStore;
use modelcast_protocol::LoaderHandle;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const PING_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct HealthState {
    pub loader: LoaderHandle,
    pub store: Arc<dyn ArtifactStore>,
    pub prometheus: Option<PrometheusHandle>,
}

pub fn create_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(live))
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn live() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

/// 200 once a model is active and the store answers, 503 otherwise
async fn ready(State(state): State<HealthState>) -> impl IntoResponse {
    let model_id = state.loader.active_version();
    let model_ready = model_id.is_some();

    let store_ok = match tokio::time::timeout(PING_TIMEOUT, state.store.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "Store ping failed");
            false
        }
        Err(_) => {
            debug!("Store ping timed out");
            false
        }
    };

    let ready = model_ready && store_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": ready,
            "model_ready": model_ready,
            "store": store_ok,
            "model_id": model_id,
        })),
    )
}

async fn metrics(State(state): State<HealthState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}

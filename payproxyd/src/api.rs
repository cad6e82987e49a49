use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use payproxy_core::{DatabasePool, Error, MetricsSummary, PayoutStats, ProxyMetrics, Result};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::sync::watch;
use tracing::{error, info};

/// Shared state of the monitoring endpoints
#[derive(Clone)]
pub struct ApiState {
    pub metrics: Arc<ProxyMetrics>,
    pub database: Arc<DatabasePool>,
    pub started_at: Instant,
}

#[derive(Debug, Serialize)]
pub struct ApiStats {
    pub uptime_secs: u64,
    pub relay: MetricsSummary,
    pub payouts: PayoutStats,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Serve the monitoring endpoints until `shutdown` flips to true
pub async fn serve(bind_address: SocketAddr, state: ApiState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await
        .map_err(|e| Error::Transport(format!("Failed to bind monitoring endpoint {}: {}", bind_address, e)))?;
    info!("Monitoring endpoint listening on http://{}", bind_address);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}

async fn metrics(State(state): State<ApiState>) -> std::result::Result<impl IntoResponse, StatusCode> {
    let body = state.metrics.render().map_err(|e| {
        error!("Failed to render metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.database.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "timestamp": chrono::Utc::now().timestamp()
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
                "timestamp": chrono::Utc::now().timestamp()
            })),
        ),
    }
}

async fn stats(State(state): State<ApiState>) -> std::result::Result<Json<ApiStats>, StatusCode> {
    let payouts = state.database.get_stats().await.map_err(|e| {
        error!("Failed to read payout stats: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(ApiStats {
        uptime_secs: state.started_at.elapsed().as_secs(),
        relay: state.metrics.summary(),
        payouts,
    }))
}

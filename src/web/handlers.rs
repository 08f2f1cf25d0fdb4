use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio::time::timeout;
use tracing::warn;

use super::{AppError, AppState};
use crate::db::services::{
    interface_service, quota_service, reset_service, snapshot_service, system_info_service,
};
use crate::worker::{Job, JobError, JobKind};
use crate::ws::handler::serve_client;

/// Deadline for an on-demand WAN detection triggered over HTTP.
const WAN_DETECT_DEADLINE: Duration = Duration::from_secs(30);

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn get_interfaces(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let interfaces = interface_service::list_interfaces(&state.db).await?;
    Ok(Json(json!({ "interfaces": interfaces })))
}

pub async fn get_interface(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let iface = interface_service::get_interface(&state.db, &name)
        .await?
        .ok_or_else(|| AppError::NotFound("Interface not found".to_string()))?;
    Ok(Json(iface))
}

pub async fn get_system_info(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let info = system_info_service::latest_system_info(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("System info not available yet".to_string()))?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<i64>,
}

pub async fn get_traffic_history(
    State(state): State<Arc<AppState>>,
    Path(interface): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit = match query.limit {
        Some(n) if n > 0 => n as u64,
        _ => 100,
    };
    let snapshots = snapshot_service::history(&state.db, &interface, limit).await?;
    let history: Vec<serde_json::Value> = snapshots
        .iter()
        .map(|s| {
            json!({
                "timestamp": s.timestamp.to_rfc3339(),
                "rx_rate": s.rx_rate,
                "tx_rate": s.tx_rate,
            })
        })
        .collect();
    Ok(Json(json!({
        "interface": interface,
        "history": history,
        "limit": limit,
    })))
}

pub async fn populate_test_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    reset_service::populate_fixture_reset_logs(&state.db).await?;
    Ok(Json(json!({ "message": "Test data populated successfully" })))
}

pub async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if state.hub.client_count() >= state.config.dashboard.max_connections {
        warn!("rejecting websocket connection, dashboard connection cap reached");
        return AppError::ServiceUnavailable("Too many dashboard connections".to_string())
            .into_response();
    }
    let hub = state.hub.clone();
    let ping_period = state.config.websocket.ping_period;
    ws.on_upgrade(move |socket| serve_client(socket, hub, ping_period))
        .into_response()
}

pub async fn get_wan_interface(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let decision = match timeout(WAN_DETECT_DEADLINE, state.wan.detect()).await {
        Ok(decision) => decision,
        Err(_) => {
            return Err(AppError::InternalServerError(
                "WAN detection timed out".to_string(),
            ))
        }
    };
    if decision.name == "none" {
        return Ok(Json(json!({
            "wan_interface": decision,
            "message": "No active WAN interface detected. Please check your router configuration.",
        })));
    }
    Ok(Json(json!({ "wan_interface": decision })))
}

pub async fn get_wan_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.wan.metrics().stats())
}

pub async fn get_worker_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "worker_count": state.pool.worker_count(),
        "queue_size": state.pool.queue_len(),
        "queue_capacity": state.pool.queue_capacity(),
        "load_percentage": state.pool.load(),
        "should_rebalance": state.pool.should_rebalance(),
        "metrics": state.pool.metrics_snapshot(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub interface_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub max_retries: u32,
}

pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.interface_name.is_empty() {
        return Err(AppError::InvalidInput(
            "interface_name is required".to_string(),
        ));
    }
    let kind = JobKind::from_name(&request.kind)
        .ok_or_else(|| AppError::InvalidInput(format!("unknown job type: {}", request.kind)))?;

    let job = Job::new(
        &request.interface_name,
        kind,
        Duration::from_secs(request.timeout),
        request.max_retries,
    );
    match state.pool.submit_job(job).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "message": "Job submitted successfully",
                "job": {
                    "interface_name": request.interface_name,
                    "type": kind.as_str(),
                    "timeout": request.timeout,
                    "max_retries": request.max_retries,
                },
            })),
        )),
        Err(JobError::QueueFull) => Err(AppError::ServiceUnavailable(
            "job queue is full".to_string(),
        )),
        Err(e) => Err(AppError::InternalServerError(e.to_string())),
    }
}

pub async fn websocket_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let subscriptions = state.hub.subscription_counts();
    Json(json!({
        "client_count": state.hub.client_count(),
        "subscription_count": subscriptions.len(),
        "active_channels": subscriptions,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    month: Option<i32>,
    year: Option<i32>,
}

pub async fn get_usage(
    State(state): State<Arc<AppState>>,
    Path(interface): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let month = query
        .month
        .ok_or_else(|| AppError::InvalidInput("month is required".to_string()))?;
    let year = query
        .year
        .ok_or_else(|| AppError::InvalidInput("year is required".to_string()))?;
    if !(1..=12).contains(&month) {
        return Err(AppError::InvalidInput(
            "month must be between 1 and 12".to_string(),
        ));
    }
    if !(2020..=2100).contains(&year) {
        return Err(AppError::InvalidInput(
            "year must be between 2020 and 2100".to_string(),
        ));
    }

    let days = quota_service::monthly_usage(&state.db, &interface, year, month as u32).await?;
    let total_rx: i64 = days.iter().map(|d| d.rx_bytes).sum();
    let total_tx: i64 = days.iter().map(|d| d.tx_bytes).sum();
    Ok(Json(json!({
        "interface": interface,
        "month": month,
        "year": year,
        "days": days,
        "totals": {
            "rx_bytes": total_rx,
            "tx_bytes": total_tx,
            "total_bytes": total_rx + total_tx,
        },
    })))
}

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::metrics::MetricsService;
use crate::wan::WanDetector;
use crate::worker::WorkerPool;
use crate::ws::WsHub;
pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: AppConfig,
    pub hub: Arc<WsHub>,
    pub wan: Arc<WanDetector>,
    pub pool: Arc<WorkerPool>,
    pub metrics: Arc<MetricsService>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let api = Router::new()
        .route("/interfaces", get(handlers::get_interfaces))
        .route("/interfaces/{name}", get(handlers::get_interface))
        .route("/system", get(handlers::get_system_info))
        .route("/traffic/{interface}", get(handlers::get_traffic_history))
        .route("/populate-test-data", post(handlers::populate_test_data))
        .route("/ws", get(handlers::websocket_upgrade))
        .route("/wan-interface", get(handlers::get_wan_interface))
        .route("/wan-stats", get(handlers::get_wan_stats))
        .route("/worker-status", get(handlers::get_worker_status))
        .route("/submit-job", post(handlers::submit_job))
        .route("/websocket-stats", get(handlers::websocket_stats))
        .route("/usage/{interface}", get(handlers::get_usage));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .with_state(Arc::new(state))
        .layer(cors)
}

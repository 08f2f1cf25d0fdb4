//! Periodic aggregation of component counters into a system health view,
//! broadcast to dashboard clients as `metrics_update` events.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::interval;
use tracing::{debug, info};

use crate::config::MetricsConfig;
use crate::wan::WanDetector;
use crate::worker::WorkerPool;
use crate::ws::models::EVENT_METRICS_UPDATE;
use crate::ws::WsHub;

#[derive(Clone, Debug, Serialize)]
pub struct SystemHealth {
    /// healthy, degraded, or critical.
    pub status: String,
    pub last_check: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub error_rate: f64,
    pub active_workers: usize,
    pub queue_size: usize,
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self {
            status: "unknown".to_string(),
            last_check: Utc::now(),
            uptime_seconds: 0,
            error_rate: 0.0,
            active_workers: 0,
            queue_size: 0,
        }
    }
}

pub struct MetricsService {
    config: MetricsConfig,
    hub: Arc<WsHub>,
    wan: Arc<WanDetector>,
    pool: Arc<WorkerPool>,
    health: RwLock<SystemHealth>,
    started_at: Instant,
}

impl MetricsService {
    pub fn new(
        config: MetricsConfig,
        hub: Arc<WsHub>,
        wan: Arc<WanDetector>,
        pool: Arc<WorkerPool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            hub,
            wan,
            pool,
            health: RwLock::new(SystemHealth::default()),
            started_at: Instant::now(),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(service.config.collection_interval);
            info!(
                interval_secs = service.config.collection_interval.as_secs(),
                "metrics aggregation started"
            );
            loop {
                ticker.tick().await;
                service.aggregate();
            }
        });
    }

    /// One aggregation pass: recompute health and broadcast the update.
    pub fn aggregate(&self) {
        let health = self.derive_health();
        *self.health.write().unwrap() = health.clone();
        debug!(status = %health.status, error_rate = health.error_rate, "health derived");

        self.hub.broadcast_event(
            EVENT_METRICS_UPDATE,
            "System metrics updated",
            serde_json::json!({
                "timestamp": Utc::now(),
                "system_health": health,
                "websocket_metrics": self.hub.metrics().stats(),
                "wan_detection_metrics": self.wan.metrics().stats(),
                "worker_pool_metrics": self.pool.metrics_snapshot(),
            }),
        );
    }

    /// Error rate across websocket drops, WAN failures, and worker
    /// failures, expressed as a percentage of total requests.
    fn derive_health(&self) -> SystemHealth {
        let ws = self.hub.metrics();
        let pool = self.pool.metrics_snapshot();

        let total_errors = ws.messages_dropped() as f64
            + self.wan.metrics().failures() as f64
            + pool.failed_jobs as f64;
        let total_requests = ws.messages_sent() as f64
            + self.wan.metrics().requests() as f64
            + pool.total_jobs as f64;

        let error_rate = if total_requests > 0.0 {
            total_errors / total_requests * 100.0
        } else {
            0.0
        };
        let status = if error_rate < 1.0 {
            "healthy"
        } else if error_rate < 5.0 {
            "degraded"
        } else {
            "critical"
        };

        SystemHealth {
            status: status.to_string(),
            last_check: Utc::now(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            error_rate,
            active_workers: pool.active_jobs,
            queue_size: self.pool.queue_len(),
        }
    }

    pub fn health(&self) -> SystemHealth {
        self.health.read().unwrap().clone()
    }

    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "system_health": self.health(),
            "websocket_metrics": self.hub.metrics().stats(),
            "wan_detection_metrics": self.wan.metrics().stats(),
            "worker_pool_metrics": self.pool.metrics_snapshot(),
        })
    }
}

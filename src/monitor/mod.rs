//! The monitoring loop: every ten seconds list interfaces, fan traffic
//! probes out through the worker pool, detect counter resets, persist
//! rows/snapshots, feed the monthly-quota accounting, and publish realtime
//! updates. A failed inventory does not abort the tick: the offline path
//! still touches every known interface and its quota day row.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::db::services::{
    interface_service, quota_service, reset_service, snapshot_service, system_info_service,
};
use crate::router::{InterfaceSample, RouterClient, RouterError};
use crate::worker::{Job, JobKind, JobOutput, WorkerPool};
use crate::ws::models::{
    EVENT_COUNTER_RESET, EVENT_INTERFACE_DOWN, EVENT_INTERFACE_UP, EVENT_REBOOT, EVENT_TRAFFIC,
};
use crate::ws::{RealTimeData, WsHub};

/// Snapshot policy: write when the cumulative total grew by more than this.
const SNAPSHOT_GROWTH_BYTES: u64 = 10 * 1024 * 1024 * 1024;
const INVENTORY_ATTEMPTS: u32 = 3;
const INVENTORY_RETRY_PAUSE: Duration = Duration::from_secs(2);
/// Job timeout for one traffic probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long the collector waits for a probe result (queueing included).
const PROBE_WAIT: Duration = Duration::from_secs(8);
/// System info is refreshed every Nth tick.
const SYSTEM_INFO_EVERY: u64 = 6;
/// A reboot log within this many minutes explains a counter reset.
const REBOOT_RELEVANCE_MINUTES: i64 = 30;

pub struct MonitoringService {
    db: DatabaseConnection,
    client: Arc<RouterClient>,
    pool: Arc<WorkerPool>,
    hub: Arc<WsHub>,
    config: MonitorConfig,
    /// Serializes every read-modify-write store path, including the
    /// offline path.
    write_lock: Mutex<()>,
    tick_count: AtomicU64,
}

impl MonitoringService {
    pub fn new(
        db: DatabaseConnection,
        client: Arc<RouterClient>,
        pool: Arc<WorkerPool>,
        hub: Arc<WsHub>,
        config: MonitorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            client,
            pool,
            hub,
            config,
            write_lock: Mutex::new(()),
            tick_count: AtomicU64::new(0),
        })
    }

    /// Spawns the collection loop. Ticks never overlap; an overrunning
    /// tick delays the next one.
    pub fn start(self: &Arc<Self>) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(service.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the immediate first tick
            info!(
                interval_secs = service.config.interval.as_secs(),
                "monitoring loop started"
            );
            loop {
                ticker.tick().await;
                if timeout(service.config.tick_deadline, service.collect_once())
                    .await
                    .is_err()
                {
                    error!(
                        deadline_secs = service.config.tick_deadline.as_secs(),
                        "collection tick exceeded its deadline"
                    );
                }
            }
        });
    }

    /// One full collection tick. Public so tests can drive ticks directly.
    pub async fn collect_once(&self) {
        let interfaces = match self.inventory().await {
            Ok(interfaces) => interfaces,
            Err(e) => {
                error!(error = %e, "router offline after retries, recording offline status");
                self.record_offline().await;
                return;
            }
        };

        let names: Vec<String> = interfaces.iter().map(|i| i.name.clone()).collect();
        let rates = self.probe_rates(&names).await;

        for mut sample in interfaces {
            let (rx_rate, tx_rate) = rates.get(&sample.name).copied().unwrap_or((0.0, 0.0));
            sample.rx_rate_mbps = rx_rate;
            sample.tx_rate_mbps = tx_rate;
            if let Err(e) = self.save_sample(&sample).await {
                error!(interface = %sample.name, error = %e, "failed to persist sample");
            }
        }

        let tick = self.tick_count.fetch_add(1, Ordering::Relaxed);
        if tick % SYSTEM_INFO_EVERY == 0 {
            self.refresh_system_info().await;
        }
    }

    /// Lists interfaces with up to three attempts, pausing between them.
    async fn inventory(&self) -> Result<Vec<InterfaceSample>, RouterError> {
        let mut last_err = RouterError::Unreachable("no attempt made".to_string());
        for attempt in 1..=INVENTORY_ATTEMPTS {
            match self.client.list_interfaces().await {
                Ok(interfaces) => {
                    debug!(attempt, count = interfaces.len(), "inventory collected");
                    return Ok(interfaces);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "inventory attempt failed");
                    last_err = e;
                    if attempt < INVENTORY_ATTEMPTS {
                        tokio::time::sleep(INVENTORY_RETRY_PAUSE).await;
                    }
                }
            }
        }
        Err(last_err)
    }

    /// Fans one traffic probe per interface out through the worker pool
    /// and gathers the per-name results under per-probe deadlines.
    async fn probe_rates(&self, names: &[String]) -> HashMap<String, (f64, f64)> {
        let mut pending = Vec::with_capacity(names.len());
        for name in names {
            let (job, result_rx) =
                Job::new(name, JobKind::Traffic, PROBE_TIMEOUT, 0).with_result();
            match self.pool.submit_job(job).await {
                Ok(()) => pending.push((name.clone(), result_rx)),
                Err(e) => warn!(interface = %name, error = %e, "could not queue traffic probe"),
            }
        }

        let waits = pending.into_iter().map(|(name, result_rx)| async move {
            match timeout(PROBE_WAIT, result_rx).await {
                Ok(Ok(Ok(JobOutput::Rates { rx_mbps, tx_mbps }))) => {
                    Some((name, (rx_mbps, tx_mbps)))
                }
                Ok(Ok(Ok(_))) => None,
                Ok(Ok(Err(e))) => {
                    warn!(interface = %name, error = %e, "traffic probe failed");
                    None
                }
                Ok(Err(_)) => None,
                Err(_) => {
                    warn!(interface = %name, "traffic probe result timed out");
                    None
                }
            }
        });
        futures_util::future::join_all(waits)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Persists one sample: reset detection, row upsert, reset log,
    /// snapshot policy, quota accounting, and the realtime broadcast.
    async fn save_sample(&self, sample: &InterfaceSample) -> Result<(), sea_orm::DbErr> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let existing = interface_service::get_interface(&self.db, &sample.name).await?;
        let is_reset = existing
            .as_ref()
            .map(|row| {
                sample.rx_bytes < row.rx_bytes as u64 || sample.tx_bytes < row.tx_bytes as u64
            })
            .unwrap_or(false);

        let status = if sample.running { "up" } else { "down" };
        interface_service::upsert_interface(
            &self.db,
            &sample.name,
            sample.rx_bytes,
            sample.tx_bytes,
            sample.rx_rate_mbps,
            sample.tx_rate_mbps,
            status,
            &sample.comment,
            now,
        )
        .await?;

        if let Some(row) = &existing {
            if row.status != status && (row.status == "up" || row.status == "down") {
                let event = if sample.running {
                    EVENT_INTERFACE_UP
                } else {
                    EVENT_INTERFACE_DOWN
                };
                self.hub.broadcast_event(
                    event,
                    &format!("Interface {} is now {status}", sample.name),
                    serde_json::json!({ "interface": sample.name }),
                );
            }
        }

        if is_reset {
            let row = existing.as_ref().expect("reset implies an existing row");
            warn!(
                interface = %sample.name,
                old_rx = row.rx_bytes,
                old_tx = row.tx_bytes,
                new_rx = sample.rx_bytes,
                new_tx = sample.tx_bytes,
                "counter reset detected"
            );
            let notes = self.reboot_note(now).await;
            reset_service::insert_reset_log(
                &self.db,
                &sample.name,
                now,
                (row.rx_bytes + row.tx_bytes) as u64,
                sample.rx_bytes + sample.tx_bytes,
                "sudden_drop",
                &notes,
            )
            .await?;
            interface_service::increment_reset_count(&self.db, &sample.name).await?;
            self.hub.broadcast_event(
                EVENT_COUNTER_RESET,
                &format!("Counter reset detected on {}", sample.name),
                serde_json::json!({
                    "interface": sample.name,
                    "previous_bytes": row.rx_bytes + row.tx_bytes,
                    "new_bytes": sample.rx_bytes + sample.tx_bytes,
                }),
            );
        }

        if sample.name == self.config.snapshot_interface {
            self.handle_snapshot(sample, is_reset).await?;
        }

        quota_service::update_quota(
            &self.db,
            &sample.name,
            sample.rx_bytes,
            sample.tx_bytes,
            is_reset,
            now,
        )
        .await?;

        self.hub.broadcast_data(RealTimeData {
            interface_name: sample.name.clone(),
            rx_rate: sample.rx_rate_mbps,
            tx_rate: sample.tx_rate_mbps,
            rx_bytes: sample.rx_bytes,
            tx_bytes: sample.tx_bytes,
            status: status.to_string(),
            comment: sample.comment.clone(),
            timestamp: now,
            event_type: EVENT_TRAFFIC.to_string(),
        });

        Ok(())
    }

    /// Checks the router log for a recent reboot that would explain a
    /// counter reset. Best effort; an unreachable log is an empty note.
    async fn reboot_note(&self, now: chrono::DateTime<Utc>) -> String {
        match self.client.get_last_reboot_time().await {
            Ok(reboot_at)
                if now - reboot_at < chrono::Duration::minutes(REBOOT_RELEVANCE_MINUTES) =>
            {
                self.hub.broadcast_event(
                    EVENT_REBOOT,
                    "Router reboot detected",
                    serde_json::json!({ "rebooted_at": reboot_at }),
                );
                format!("router reboot logged at {}", reboot_at.to_rfc3339())
            }
            _ => String::new(),
        }
    }

    /// Snapshot policy for the configured subject: write on first sight,
    /// on reset, or after more than 10 GiB of growth.
    async fn handle_snapshot(
        &self,
        sample: &InterfaceSample,
        is_reset: bool,
    ) -> Result<(), sea_orm::DbErr> {
        let current_total = sample.rx_bytes + sample.tx_bytes;
        let last = snapshot_service::latest_snapshot(&self.db, &sample.name).await?;
        let should_write = match &last {
            None => true,
            Some(_) if is_reset => true,
            Some(prev) => {
                current_total.saturating_sub(prev.total_bytes as u64) > SNAPSHOT_GROWTH_BYTES
            }
        };
        if should_write {
            snapshot_service::insert_snapshot(
                &self.db,
                &sample.name,
                Utc::now(),
                sample.rx_bytes,
                sample.tx_bytes,
                sample.rx_rate_mbps,
                sample.tx_rate_mbps,
                is_reset,
            )
            .await?;
            info!(
                interface = %sample.name,
                total_bytes = current_total,
                counter_reset = is_reset,
                "traffic snapshot saved"
            );
        }
        Ok(())
    }

    /// Offline path: zero rates on every known interface, touch
    /// `last_seen`, and still run the quota updater with the preserved
    /// cumulative counters so day rows exist and baselines survive.
    pub async fn record_offline(&self) {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        let known = match interface_service::mark_all_offline(&self.db, now).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "failed to mark interfaces offline");
                return;
            }
        };
        info!(count = known.len(), "recorded offline status for known interfaces");

        for row in known {
            if let Err(e) = quota_service::update_quota(
                &self.db,
                &row.interface_name,
                row.rx_bytes as u64,
                row.tx_bytes as u64,
                false,
                now,
            )
            .await
            {
                error!(
                    interface = %row.interface_name,
                    error = %e,
                    "offline quota update failed"
                );
            }
        }
    }

    async fn refresh_system_info(&self) {
        match self.client.get_system_info().await {
            Ok(info) => {
                if let Err(e) =
                    system_info_service::upsert_system_info(&self.db, &info, Utc::now()).await
                {
                    warn!(error = %e, "failed to persist system info");
                }
            }
            Err(e) => debug!(error = %e, "system info refresh skipped"),
        }
    }
}

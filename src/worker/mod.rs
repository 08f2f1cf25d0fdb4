//! Bounded pool of probe workers. A dispatcher pulls from a shared job
//! queue, consults the circuit breaker, picks a worker through the load
//! balancer, and hands the job over a one-slot channel. Every worker
//! executes against the shared router client, so router calls stay
//! serialized by the session mutex.

pub mod circuit_breaker;
pub mod load_balancer;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::WorkerPoolConfig;
use crate::router::{InterfaceSample, RouterClient, RouterError};
use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use load_balancer::{LoadBalancer, Strategy, WorkerView};

/// How long `submit_job` waits for queue space before failing.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long the dispatcher waits for a busy worker before requeueing.
const HANDOFF_TIMEOUT: Duration = Duration::from_secs(1);
/// Circuit breaker supervision cadence.
const SUPERVISOR_INTERVAL: Duration = Duration::from_secs(10);
/// Retry backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Traffic,
    Stats,
    Discovery,
}

impl JobKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "traffic" => Some(JobKind::Traffic),
            "stats" => Some(JobKind::Stats),
            "discovery" => Some(JobKind::Discovery),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Traffic => "traffic",
            JobKind::Stats => "stats",
            JobKind::Discovery => "discovery",
        }
    }
}

#[derive(Debug)]
pub enum JobOutput {
    Rates { rx_mbps: f64, tx_mbps: f64 },
    Interfaces(Vec<InterfaceSample>),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error("job queue is full")]
    QueueFull,
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// One unit of probe work. Retries keep the same job identity (and result
/// channel) and go back through the main queue.
#[derive(Debug)]
pub struct Job {
    pub interface_name: String,
    pub kind: JobKind,
    pub timeout: Duration,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    result_tx: Option<oneshot::Sender<Result<JobOutput, JobError>>>,
}

impl Job {
    pub fn new(interface_name: &str, kind: JobKind, timeout: Duration, max_retries: u32) -> Self {
        Self {
            interface_name: interface_name.to_owned(),
            kind,
            timeout,
            retry_count: 0,
            max_retries,
            priority: 0,
            created_at: Utc::now(),
            result_tx: None,
        }
    }

    /// Attaches a result channel; the receiver resolves once with the
    /// final outcome (after retries, if any).
    pub fn with_result(mut self) -> (Self, oneshot::Receiver<Result<JobOutput, JobError>>) {
        let (tx, rx) = oneshot::channel();
        self.result_tx = Some(tx);
        (self, rx)
    }
}

#[derive(Clone, Debug, Default)]
struct StatsInner {
    total_jobs: u64,
    success_jobs: u64,
    failed_jobs: u64,
    errors: u64,
    avg_response: Duration,
    last_activity: Option<DateTime<Utc>>,
    last_error: Option<DateTime<Utc>>,
}

impl StatsInner {
    /// Running average weighted by job count.
    fn observe_duration(&mut self, duration: Duration) {
        let n = self.total_jobs.max(1) as u32;
        self.avg_response = (self.avg_response * (n - 1) + duration) / n;
    }
}

struct WorkerHandle {
    id: usize,
    tx: mpsc::Sender<Job>,
    active: Arc<AtomicUsize>,
    stats: Arc<StdMutex<StatsInner>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkerStatsSnapshot {
    pub id: usize,
    pub active_jobs: usize,
    pub total_jobs: u64,
    pub success_jobs: u64,
    pub failed_jobs: u64,
    pub avg_response_ms: f64,
    pub errors: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PoolMetricsSnapshot {
    pub active_jobs: usize,
    pub total_jobs: u64,
    pub success_jobs: u64,
    pub failed_jobs: u64,
    pub avg_response_ms: f64,
    pub last_activity: Option<DateTime<Utc>>,
    pub circuit_state: CircuitState,
    pub workers: Vec<WorkerStatsSnapshot>,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    client: Arc<RouterClient>,
    queue_tx: mpsc::Sender<Job>,
    queue_rx: Mutex<Option<mpsc::Receiver<Job>>>,
    queue_len: AtomicUsize,
    workers: Vec<WorkerHandle>,
    worker_rxs: StdMutex<Vec<(usize, mpsc::Receiver<Job>)>>,
    breaker: Arc<CircuitBreaker>,
    balancer: LoadBalancer,
    active_jobs: AtomicUsize,
    metrics: StdMutex<StatsInner>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, client: Arc<RouterClient>) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_size.max(1));
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.circuit_breaker_failure_threshold,
            recovery_timeout: config.circuit_breaker_recovery_timeout,
            half_open_max_calls: config.circuit_breaker_half_open_max_calls,
        }));
        let balancer = LoadBalancer::new(Strategy::from_name(&config.load_balancing_strategy));

        let mut workers = Vec::with_capacity(config.max_workers);
        let mut worker_rxs = Vec::with_capacity(config.max_workers);
        for id in 0..config.max_workers.max(1) {
            let (tx, rx) = mpsc::channel(1);
            workers.push(WorkerHandle {
                id,
                tx,
                active: Arc::new(AtomicUsize::new(0)),
                stats: Arc::new(StdMutex::new(StatsInner::default())),
            });
            worker_rxs.push((id, rx));
        }

        Arc::new(Self {
            config,
            client,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            queue_len: AtomicUsize::new(0),
            workers,
            worker_rxs: StdMutex::new(worker_rxs),
            breaker,
            balancer,
            active_jobs: AtomicUsize::new(0),
            metrics: StdMutex::new(StatsInner::default()),
        })
    }

    /// Spawns the worker tasks, the dispatcher, and the circuit-breaker
    /// supervisor. Call once.
    pub fn start(self: &Arc<Self>) {
        let rxs = std::mem::take(&mut *self.worker_rxs.lock().unwrap());
        for (id, rx) in rxs {
            let pool = Arc::clone(self);
            tokio::spawn(async move { pool.worker_loop(id, rx).await });
        }

        let pool = Arc::clone(self);
        tokio::spawn(async move { pool.dispatch_loop().await });

        let breaker = Arc::clone(&self.breaker);
        let enabled = self.config.circuit_breaker_enabled;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SUPERVISOR_INTERVAL);
            loop {
                tick.tick().await;
                if enabled {
                    breaker.check_state();
                }
            }
        });

        info!(
            workers = self.workers.len(),
            queue = self.config.queue_size,
            strategy = %self.config.load_balancing_strategy,
            "worker pool started"
        );
    }

    /// Submits a job, waiting up to five seconds for queue space.
    pub async fn submit_job(&self, job: Job) -> Result<(), JobError> {
        match self.queue_tx.send_timeout(job, SUBMIT_TIMEOUT).await {
            Ok(()) => {
                self.queue_len.fetch_add(1, Ordering::Relaxed);
                self.metrics.lock().unwrap().total_jobs += 1;
                Ok(())
            }
            Err(_) => Err(JobError::QueueFull),
        }
    }

    /// Non-blocking resubmission used by retry and busy-worker paths. A
    /// full queue fails the job instead of dropping it silently.
    fn resubmit(&self, job: Job) {
        match self.queue_tx.try_send(job) {
            Ok(()) => {
                self.queue_len.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(job))
            | Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(
                    interface = %job.interface_name,
                    "queue full on resubmission, failing job"
                );
                self.fail_job(job, JobError::QueueFull);
            }
        }
    }

    fn fail_job(&self, mut job: Job, error: JobError) {
        self.metrics.lock().unwrap().failed_jobs += 1;
        if let Some(tx) = job.result_tx.take() {
            let _ = tx.send(Err(error));
        }
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let mut queue_rx = self
            .queue_rx
            .lock()
            .await
            .take()
            .expect("dispatcher started twice");

        while let Some(job) = queue_rx.recv().await {
            self.queue_len.fetch_sub(1, Ordering::Relaxed);

            if self.config.circuit_breaker_enabled && !self.breaker.allow() {
                debug!(interface = %job.interface_name, "circuit open, rejecting job");
                self.fail_job(job, JobError::CircuitOpen);
                continue;
            }

            let views: Vec<WorkerView> = self
                .workers
                .iter()
                .map(|w| {
                    let stats = w.stats.lock().unwrap();
                    WorkerView {
                        index: w.id,
                        active_jobs: w.active.load(Ordering::Relaxed),
                        total_jobs: stats.total_jobs,
                        success_jobs: stats.success_jobs,
                    }
                })
                .collect();
            let Some(picked) = self.balancer.select(&views) else {
                self.resubmit(job);
                continue;
            };

            let worker_tx = self.workers[picked].tx.clone();
            if let Err(e) = worker_tx.send_timeout(job, HANDOFF_TIMEOUT).await {
                let job = match e {
                    mpsc::error::SendTimeoutError::Timeout(job) => job,
                    mpsc::error::SendTimeoutError::Closed(job) => job,
                };
                debug!(worker = picked, "worker busy, requeueing job");
                self.resubmit(job);
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, id: usize, mut rx: mpsc::Receiver<Job>) {
        while let Some(job) = rx.recv().await {
            self.process_job(id, job).await;
        }
    }

    async fn process_job(self: &Arc<Self>, worker_id: usize, mut job: Job) {
        let handle = &self.workers[worker_id];
        let started = std::time::Instant::now();
        let now = Utc::now();

        handle.active.fetch_add(1, Ordering::Relaxed);
        self.active_jobs.fetch_add(1, Ordering::Relaxed);
        {
            let mut stats = handle.stats.lock().unwrap();
            stats.total_jobs += 1;
            stats.last_activity = Some(now);
        }
        self.metrics.lock().unwrap().last_activity = Some(now);

        let job_timeout = if job.timeout.is_zero() {
            self.config.worker_timeout
        } else {
            job.timeout
        };
        let result: Result<JobOutput, RouterError> = match job.kind {
            JobKind::Traffic | JobKind::Stats => {
                match timeout(job_timeout, self.client.get_traffic_rates(&job.interface_name))
                    .await
                {
                    Ok(Ok((rx_mbps, tx_mbps))) => Ok(JobOutput::Rates { rx_mbps, tx_mbps }),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(RouterError::Deadline("job")),
                }
            }
            JobKind::Discovery => match timeout(job_timeout, self.client.list_interfaces()).await {
                Ok(Ok(interfaces)) => Ok(JobOutput::Interfaces(interfaces)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(RouterError::Deadline("job")),
            },
        };

        let elapsed = started.elapsed();
        handle.active.fetch_sub(1, Ordering::Relaxed);
        self.active_jobs.fetch_sub(1, Ordering::Relaxed);
        {
            let mut stats = handle.stats.lock().unwrap();
            stats.observe_duration(elapsed);
        }
        {
            let mut metrics = self.metrics.lock().unwrap();
            metrics.observe_duration(elapsed);
        }

        match result {
            Ok(output) => {
                {
                    let mut stats = handle.stats.lock().unwrap();
                    stats.success_jobs += 1;
                }
                self.metrics.lock().unwrap().success_jobs += 1;
                self.breaker.record_success();
                if let Some(tx) = job.result_tx.take() {
                    let _ = tx.send(Ok(output));
                }
            }
            Err(error) => {
                {
                    let mut stats = handle.stats.lock().unwrap();
                    stats.failed_jobs += 1;
                    stats.errors += 1;
                    stats.last_error = Some(Utc::now());
                }
                self.breaker.record_failure();

                if job.retry_count < job.max_retries {
                    job.retry_count += 1;
                    let backoff = Duration::from_secs(1u64 << (job.retry_count - 1).min(5))
                        .min(MAX_BACKOFF);
                    debug!(
                        interface = %job.interface_name,
                        attempt = job.retry_count,
                        backoff_secs = backoff.as_secs(),
                        error = %error,
                        "job failed, scheduling retry"
                    );
                    // Back off in a detached task so the worker slot frees
                    // immediately.
                    let pool = Arc::clone(self);
                    tokio::spawn(async move {
                        tokio::time::sleep(backoff).await;
                        pool.resubmit(job);
                    });
                } else {
                    warn!(
                        interface = %job.interface_name,
                        error = %error,
                        "job failed permanently"
                    );
                    self.fail_job(job, JobError::Router(error));
                }
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn queue_capacity(&self) -> usize {
        self.config.queue_size
    }

    /// Fraction of workers currently busy.
    pub fn load(&self) -> f64 {
        self.active_jobs.load(Ordering::Relaxed) as f64 / self.workers.len().max(1) as f64
    }

    pub fn should_rebalance(&self) -> bool {
        self.load() > self.config.load_threshold
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn metrics_snapshot(&self) -> PoolMetricsSnapshot {
        let pool_stats = self.metrics.lock().unwrap().clone();
        let workers = self
            .workers
            .iter()
            .map(|w| {
                let stats = w.stats.lock().unwrap().clone();
                WorkerStatsSnapshot {
                    id: w.id,
                    active_jobs: w.active.load(Ordering::Relaxed),
                    total_jobs: stats.total_jobs,
                    success_jobs: stats.success_jobs,
                    failed_jobs: stats.failed_jobs,
                    avg_response_ms: stats.avg_response.as_secs_f64() * 1000.0,
                    errors: stats.errors,
                    last_activity: stats.last_activity,
                    last_error: stats.last_error,
                }
            })
            .collect();
        PoolMetricsSnapshot {
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            total_jobs: pool_stats.total_jobs,
            success_jobs: pool_stats.success_jobs,
            failed_jobs: pool_stats.failed_jobs,
            avg_response_ms: pool_stats.avg_response.as_secs_f64() * 1000.0,
            last_activity: pool_stats.last_activity,
            circuit_state: self.breaker.state(),
            workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_kinds_parse_by_name() {
        assert_eq!(JobKind::from_name("traffic"), Some(JobKind::Traffic));
        assert_eq!(JobKind::from_name("stats"), Some(JobKind::Stats));
        assert_eq!(JobKind::from_name("discovery"), Some(JobKind::Discovery));
        assert_eq!(JobKind::from_name("bogus"), None);
    }

    #[test]
    fn average_response_is_weighted_by_job_count() {
        let mut stats = StatsInner::default();
        stats.total_jobs = 1;
        stats.observe_duration(Duration::from_millis(100));
        assert_eq!(stats.avg_response, Duration::from_millis(100));

        stats.total_jobs = 2;
        stats.observe_duration(Duration::from_millis(300));
        assert_eq!(stats.avg_response, Duration::from_millis(200));
    }
}

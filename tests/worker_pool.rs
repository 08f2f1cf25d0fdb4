mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{unreachable_config, worker_config, FakeIface, FakeRouter, RouterState};
use monik::router::RouterClient;
use monik::worker::circuit_breaker::CircuitState;
use monik::worker::{Job, JobError, JobKind, JobOutput, WorkerPool};

#[tokio::test]
async fn submitted_probes_resolve_with_rates() {
    let router = FakeRouter::start(RouterState {
        interfaces: vec![FakeIface::new("xether2", 10, 10).rates(3_000_000, 1_500_000)],
        reply_delay: Duration::from_millis(50),
        ..Default::default()
    })
    .await;
    let client = Arc::new(RouterClient::new(router.config()));
    let pool = WorkerPool::new(worker_config(), client);
    pool.start();

    let mut receivers = Vec::new();
    for _ in 0..3 {
        let (job, rx) =
            Job::new("xether2", JobKind::Traffic, Duration::from_secs(5), 0).with_result();
        pool.submit_job(job).await.unwrap();
        receivers.push(rx);
    }

    // Every submitted job resolves; none is silently dropped.
    for rx in receivers {
        match rx.await.unwrap().unwrap() {
            JobOutput::Rates { rx_mbps, tx_mbps } => {
                assert!((rx_mbps - 3.0).abs() < f64::EPSILON);
                assert!((tx_mbps - 1.5).abs() < f64::EPSILON);
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    let metrics = pool.metrics_snapshot();
    assert_eq!(metrics.total_jobs, 3);
    assert_eq!(metrics.success_jobs, 3);
}

#[tokio::test]
async fn discovery_jobs_return_the_interface_table() {
    let router = FakeRouter::start(RouterState {
        interfaces: vec![
            FakeIface::new("xether1", 1, 2),
            FakeIface::new("xether2", 3, 4),
        ],
        ..Default::default()
    })
    .await;
    let client = Arc::new(RouterClient::new(router.config()));
    let pool = WorkerPool::new(worker_config(), client);
    pool.start();

    let (job, rx) = Job::new("", JobKind::Discovery, Duration::from_secs(5), 0).with_result();
    pool.submit_job(job).await.unwrap();
    match rx.await.unwrap().unwrap() {
        JobOutput::Interfaces(interfaces) => assert_eq!(interfaces.len(), 2),
        other => panic!("unexpected output: {other:?}"),
    }
}

#[tokio::test]
async fn full_queue_fails_the_submission_after_the_grace_period() {
    // The pool is never started, so nothing drains the queue.
    let client = Arc::new(RouterClient::new(unreachable_config()));
    let mut config = worker_config();
    config.queue_size = 2;
    let pool = WorkerPool::new(config, client);

    pool.submit_job(Job::new("a", JobKind::Traffic, Duration::ZERO, 0))
        .await
        .unwrap();
    pool.submit_job(Job::new("b", JobKind::Traffic, Duration::ZERO, 0))
        .await
        .unwrap();
    assert_eq!(pool.queue_len(), 2);

    let started = Instant::now();
    let err = pool
        .submit_job(Job::new("c", JobKind::Traffic, Duration::ZERO, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::QueueFull));
    // The submitter waited for a slot before giving up.
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test]
async fn breaker_opens_rejects_and_probes_recovery() {
    let mut config = worker_config();
    config.max_workers = 1;
    config.worker_timeout = Duration::from_secs(1);
    config.circuit_breaker_failure_threshold = 2;
    config.circuit_breaker_recovery_timeout = Duration::from_millis(300);
    config.circuit_breaker_half_open_max_calls = 1;

    let client = Arc::new(RouterClient::new(unreachable_config()));
    let pool = WorkerPool::new(config, client);
    pool.start();

    let submit_and_wait = |name: &'static str| {
        let pool = Arc::clone(&pool);
        async move {
            let (job, rx) =
                Job::new(name, JobKind::Traffic, Duration::from_secs(1), 0).with_result();
            pool.submit_job(job).await.unwrap();
            rx.await.unwrap()
        }
    };

    // Two failures trip the breaker.
    assert!(matches!(
        submit_and_wait("a").await,
        Err(JobError::Router(_))
    ));
    assert!(matches!(
        submit_and_wait("b").await,
        Err(JobError::Router(_))
    ));
    assert_eq!(pool.circuit_state(), CircuitState::Open);

    // While open, work is rejected outright.
    assert!(matches!(
        submit_and_wait("c").await,
        Err(JobError::CircuitOpen)
    ));

    // After the recovery window a probe is admitted; it fails, reopening.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(matches!(
        submit_and_wait("d").await,
        Err(JobError::Router(_))
    ));
    assert_eq!(pool.circuit_state(), CircuitState::Open);
}

#[tokio::test]
async fn failed_jobs_retry_with_backoff_before_reporting() {
    let client = Arc::new(RouterClient::new(unreachable_config()));
    let mut config = worker_config();
    config.max_workers = 1;
    config.worker_timeout = Duration::from_secs(1);
    let pool = WorkerPool::new(config, client);
    pool.start();

    let started = Instant::now();
    let (job, rx) = Job::new("xether1", JobKind::Traffic, Duration::from_secs(1), 1).with_result();
    pool.submit_job(job).await.unwrap();

    let outcome = rx.await.unwrap();
    assert!(matches!(outcome, Err(JobError::Router(_))));
    // One retry means at least the first one-second backoff elapsed.
    assert!(started.elapsed() >= Duration::from_secs(1));
}

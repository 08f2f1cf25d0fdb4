use std::sync::Arc;

use dotenv::dotenv;
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use monik::config::AppConfig;
use monik::db;
use monik::metrics::MetricsService;
use monik::monitor::MonitoringService;
use monik::router::RouterClient;
use monik::wan::WanDetector;
use monik::web::{self, AppState};
use monik::worker::WorkerPool;
use monik::ws::WsHub;

fn init_logging() {
    // File: JSON, daily rotation. Stdout: human readable.
    let file_appender = rolling::daily("logs", "monik.log");
    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false).json();
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    init_logging();

    let config = AppConfig::from_env();
    info!(
        router = %config.router.address(),
        db = %config.database.path,
        "starting monik"
    );

    let database = db::init(&config.database).await?;

    let hub = WsHub::new(
        config.websocket.broadcast_buffer_size,
        config.websocket.client_buffer_size,
    );
    hub.start();

    let client = Arc::new(RouterClient::new(config.router.clone()));

    let wan = Arc::new(WanDetector::new(
        config.wan.clone(),
        Arc::clone(&client),
        Arc::clone(&hub),
    ));

    let pool = WorkerPool::new(config.worker.clone(), Arc::clone(&client));
    pool.start();

    let monitor = MonitoringService::new(
        database.clone(),
        Arc::clone(&client),
        Arc::clone(&pool),
        Arc::clone(&hub),
        config.monitor.clone(),
    );
    monitor.start();

    let metrics = MetricsService::new(
        config.metrics.clone(),
        Arc::clone(&hub),
        Arc::clone(&wan),
        Arc::clone(&pool),
    );
    if config.metrics.enabled {
        metrics.start();
    }

    let address = config.server.address();
    let app = web::create_router(AppState {
        db: database,
        config,
        hub,
        wan,
        pool,
        metrics,
    });

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, "HTTP server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

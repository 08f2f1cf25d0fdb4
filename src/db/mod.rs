//! Persistence layer: SQLite via sea-orm, schema created at startup.

pub mod entities;
pub mod services;

use std::path::Path;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing::{info, warn};

use crate::config::DatabaseConfig;

/// Opens the database file (creating its directory if needed), applies the
/// SQLite PRAGMAs, and runs the startup migrations.
pub async fn init(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    if let Some(dir) = Path::new(&config.path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .map_err(|e| DbErr::Custom(format!("creating database directory: {e}")))?;
        }
    }

    let url = format!("sqlite://{}?mode=rwc", config.path);
    let mut options = ConnectOptions::new(url);
    options
        .max_connections(config.max_open_conn)
        .min_connections(config.max_idle_conn)
        .sqlx_logging(false);

    let db = Database::connect(options).await?;

    for pragma in [
        "PRAGMA journal_mode=WAL;",
        "PRAGMA synchronous=NORMAL;",
        "PRAGMA cache_size=-2000;",
        "PRAGMA temp_store=MEMORY;",
    ] {
        if let Err(e) = db.execute_unprepared(pragma).await {
            warn!(pragma, error = %e, "failed to apply PRAGMA");
        }
    }

    run_migrations(&db).await?;
    info!(path = %config.path, "database ready");
    Ok(db)
}

/// Idempotent schema setup. Also used directly by tests against in-memory
/// databases.
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS interfaces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            interface_name TEXT NOT NULL UNIQUE,
            rx_bytes BIGINT NOT NULL DEFAULT 0,
            tx_bytes BIGINT NOT NULL DEFAULT 0,
            rx_rate DOUBLE NOT NULL DEFAULT 0,
            tx_rate DOUBLE NOT NULL DEFAULT 0,
            last_seen TEXT NOT NULL,
            counter_reset_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'unknown',
            comment TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS traffic_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            interface_name TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            rx_bytes BIGINT NOT NULL DEFAULT 0,
            tx_bytes BIGINT NOT NULL DEFAULT 0,
            rx_rate DOUBLE NOT NULL DEFAULT 0,
            tx_rate DOUBLE NOT NULL DEFAULT 0,
            total_bytes BIGINT NOT NULL DEFAULT 0,
            counter_reset BOOLEAN NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_snapshots_iface_ts
            ON traffic_snapshots(interface_name, timestamp)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS counter_reset_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            interface_name TEXT NOT NULL,
            reset_time TEXT NOT NULL,
            previous_bytes BIGINT NOT NULL DEFAULT 0,
            new_bytes BIGINT NOT NULL DEFAULT 0,
            detection_method TEXT NOT NULL DEFAULT '',
            notes TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_reset_logs_iface
            ON counter_reset_logs(interface_name)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS monthly_quotas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            interface_name TEXT NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            day INTEGER NOT NULL,
            rx_bytes BIGINT NOT NULL DEFAULT 0,
            tx_bytes BIGINT NOT NULL DEFAULT 0,
            total_bytes BIGINT NOT NULL DEFAULT 0,
            total_rx BIGINT NOT NULL DEFAULT 0,
            total_tx BIGINT NOT NULL DEFAULT 0,
            last_rx_bytes BIGINT NOT NULL DEFAULT 0,
            last_tx_bytes BIGINT NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_quota_day
            ON monthly_quotas(interface_name, year, month, day)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS system_info (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity TEXT NOT NULL DEFAULT '',
            board_name TEXT NOT NULL DEFAULT '',
            version TEXT NOT NULL DEFAULT '',
            uptime TEXT NOT NULL DEFAULT '',
            cpu TEXT NOT NULL DEFAULT '',
            memory TEXT NOT NULL DEFAULT '',
            disk TEXT NOT NULL DEFAULT '',
            timezone TEXT NOT NULL DEFAULT '',
            last_updated TEXT NOT NULL
        )
        "#,
    ];
    for statement in statements {
        db.execute_unprepared(statement).await?;
    }
    Ok(())
}

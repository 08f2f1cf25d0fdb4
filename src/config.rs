use std::env;
use std::time::Duration;

/// Top-level application configuration, assembled from environment
/// variables with the defaults the service ships with.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub router: RouterConfig,
    pub wan: WanDetectionConfig,
    pub worker: WorkerPoolConfig,
    pub websocket: WebSocketConfig,
    pub monitor: MonitorConfig,
    pub metrics: MetricsConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_open_conn: u32,
    pub max_idle_conn: u32,
}

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub ip: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Dial timeout for establishing a new session.
    pub timeout: Duration,
}

impl RouterConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Clone, Debug)]
pub struct WanDetectionConfig {
    pub enabled: bool,
    /// "auto" (hybrid), "manual", or "route".
    pub detection_method: String,
    pub manual_interface: String,
    pub cache_duration: Duration,
    pub traffic_threshold: u64,
}

#[derive(Clone, Debug)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub queue_size: usize,
    pub worker_timeout: Duration,
    pub load_threshold: f64,
    pub load_balancing_strategy: String,
    pub circuit_breaker_enabled: bool,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_recovery_timeout: Duration,
    pub circuit_breaker_half_open_max_calls: u32,
}

#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    pub ping_period: Duration,
    pub broadcast_buffer_size: usize,
    pub client_buffer_size: usize,
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Collection cadence.
    pub interval: Duration,
    /// Overall deadline for one collection tick.
    pub tick_deadline: Duration,
    /// Interface subject to the snapshot policy.
    pub snapshot_interface: String,
}

#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub collection_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub max_connections: usize,
}

impl AppConfig {
    /// Loads the full configuration from the environment. Missing or
    /// malformed values fall back to defaults.
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: get_env("SERVER_HOST", "0.0.0.0"),
                port: get_env_parsed("SERVER_PORT", 8080),
            },
            database: DatabaseConfig {
                path: get_env("DB_PATH", "data/monik.db"),
                max_open_conn: get_env_parsed("DB_MAX_OPEN_CONN", 25),
                max_idle_conn: get_env_parsed("DB_MAX_IDLE_CONN", 5),
            },
            router: RouterConfig {
                ip: get_env("ROUTER_IP", "192.168.88.1"),
                port: get_env_parsed("ROUTER_PORT", 8728),
                username: get_env("ROUTER_USERNAME", "admin"),
                password: get_env("ROUTER_PASSWORD", ""),
                timeout: get_env_duration("ROUTER_TIMEOUT", Duration::from_secs(5)),
            },
            wan: WanDetectionConfig {
                enabled: get_env_parsed("WAN_ENABLED", true),
                detection_method: get_env("WAN_DETECTION_METHOD", "auto"),
                manual_interface: get_env("WAN_MANUAL_INTERFACE", ""),
                cache_duration: get_env_duration("WAN_CACHE_DURATION", Duration::from_secs(300)),
                traffic_threshold: get_env_parsed("WAN_TRAFFIC_THRESHOLD", 1024 * 1024),
            },
            worker: WorkerPoolConfig {
                max_workers: get_env_parsed("WORKER_MAX_WORKERS", 4),
                queue_size: get_env_parsed("WORKER_QUEUE_SIZE", 100),
                worker_timeout: get_env_duration("WORKER_TIMEOUT", Duration::from_secs(30)),
                load_threshold: get_env_parsed("WORKER_LOAD_THRESHOLD", 0.8),
                load_balancing_strategy: get_env("WORKER_LOAD_BALANCING_STRATEGY", "round_robin"),
                circuit_breaker_enabled: get_env_parsed("WORKER_CIRCUIT_BREAKER_ENABLED", true),
                circuit_breaker_failure_threshold: get_env_parsed(
                    "WORKER_CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                    5,
                ),
                circuit_breaker_recovery_timeout: get_env_duration(
                    "WORKER_CIRCUIT_BREAKER_RECOVERY_TIMEOUT",
                    Duration::from_secs(60),
                ),
                circuit_breaker_half_open_max_calls: get_env_parsed(
                    "WORKER_CIRCUIT_BREAKER_HALF_OPEN_MAX_CALLS",
                    3,
                ),
            },
            websocket: WebSocketConfig {
                ping_period: get_env_duration("WEBSOCKET_PING_PERIOD", Duration::from_secs(54)),
                broadcast_buffer_size: get_env_parsed("WEBSOCKET_BROADCAST_BUFFER_SIZE", 10_000),
                client_buffer_size: get_env_parsed("WEBSOCKET_CLIENT_BUFFER_SIZE", 1024),
            },
            monitor: MonitorConfig {
                interval: get_env_duration("MONITOR_INTERVAL", Duration::from_secs(10)),
                tick_deadline: get_env_duration("MONITOR_TICK_DEADLINE", Duration::from_secs(25)),
                snapshot_interface: get_env("MONITOR_SNAPSHOT_INTERFACE", "xether2"),
            },
            metrics: MetricsConfig {
                enabled: get_env_parsed("METRICS_ENABLED", true),
                collection_interval: get_env_duration(
                    "METRICS_COLLECTION_INTERVAL",
                    Duration::from_secs(30),
                ),
            },
            dashboard: DashboardConfig {
                max_connections: get_env_parsed("DASHBOARD_MAX_CONNECTIONS", 100),
            },
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn get_env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn get_env_duration(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(v) => parse_duration(&v).unwrap_or(default),
        Err(_) => default,
    }
}

/// Parses `"30"`, `"30s"`, `"5m"`, `"2h"` into a duration. Bare numbers are
/// seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let n: u64 = value.parse().ok()?;
    match unit.trim() {
        "s" | "sec" => Some(Duration::from_secs(n)),
        "m" | "min" => Some(Duration::from_secs(n * 60)),
        "h" => Some(Duration::from_secs(n * 3600)),
        "ms" => Some(Duration::from_millis(n)),
        _ => None,
    }
}

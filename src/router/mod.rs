//! Single-session client for the RouterOS API. All commands are serialized
//! through one session behind a mutex; a transport error drops the session
//! and the next call reconnects lazily.

pub mod protocol;

use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::io::BufStream;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::RouterConfig;
use protocol::{read_reply, write_sentence, Reply};

/// Deadline for ordinary print commands.
const CMD_DEADLINE: Duration = Duration::from_secs(10);
/// Deadline for a single traffic probe.
const PROBE_DEADLINE: Duration = Duration::from_secs(5);
/// Deadline for the liveness ping.
const PING_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("router unreachable: {0}")]
    Unreachable(String),
    #[error("router authentication failed: {0}")]
    Auth(String),
    #[error("deadline exceeded during {0}")]
    Deadline(&'static str),
    #[error("no data returned for {0}")]
    NoData(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("router trap: {0}")]
    Trap(String),
}

impl RouterError {
    /// Errors that leave the session unusable.
    fn poisons_session(&self) -> bool {
        !matches!(self, RouterError::Trap(_) | RouterError::NoData(_))
    }
}

/// One observation of a router interface. Counters are cumulative; rates
/// are filled in separately by traffic probes.
#[derive(Clone, Debug)]
pub struct InterfaceSample {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_rate_mbps: f64,
    pub tx_rate_mbps: f64,
    pub running: bool,
    pub comment: String,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct SystemInfo {
    pub identity: String,
    pub board_name: String,
    pub version: String,
    pub uptime: String,
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    pub timezone: String,
}

/// Raw route record as the router reports it.
#[derive(Clone, Debug, Default)]
pub struct RouteEntry {
    pub dst_address: String,
    pub gateway: String,
    pub immediate_gw: String,
    pub interface: String,
    pub active: bool,
}

struct Session {
    stream: BufStream<TcpStream>,
}

impl Session {
    async fn connect(config: &RouterConfig) -> Result<Self, RouterError> {
        let stream = TcpStream::connect(config.address())
            .await
            .map_err(|e| RouterError::Unreachable(e.to_string()))?;
        let mut session = Session {
            stream: BufStream::new(stream),
        };
        session.login(&config.username, &config.password).await?;
        Ok(session)
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<(), RouterError> {
        let name = format!("=name={username}");
        let pass = format!("=password={password}");
        write_sentence(&mut self.stream, &["/login", &name, &pass]).await?;
        match read_reply(&mut self.stream).await {
            Ok(_) => Ok(()),
            Err(RouterError::Trap(msg)) => Err(RouterError::Auth(msg)),
            Err(e) => Err(e),
        }
    }

    async fn run(&mut self, words: &[&str]) -> Result<Reply, RouterError> {
        write_sentence(&mut self.stream, words).await?;
        read_reply(&mut self.stream).await
    }
}

/// Facade over one authenticated router session.
pub struct RouterClient {
    config: RouterConfig,
    session: Mutex<Option<Session>>,
}

impl RouterClient {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Drops the current session so the next call reconnects.
    pub async fn invalidate(&self) {
        let mut guard = self.session.lock().await;
        *guard = None;
    }

    /// Ensures a live session, runs one command sentence under the session
    /// mutex, and drops the session on any transport-class failure.
    async fn run_command(
        &self,
        op: &'static str,
        words: &[&str],
        deadline: Duration,
    ) -> Result<Reply, RouterError> {
        let mut guard = self.session.lock().await;

        if guard.is_none() {
            let session = timeout(self.config.timeout, Session::connect(&self.config))
                .await
                .map_err(|_| RouterError::Deadline("connect"))??;
            debug!(address = %self.config.address(), "router session established");
            *guard = Some(session);
        }

        let session = guard.as_mut().expect("session ensured above");
        let result = match timeout(deadline, session.run(words)).await {
            Ok(res) => res,
            Err(_) => Err(RouterError::Deadline(op)),
        };

        if let Err(e) = &result {
            if e.poisons_session() {
                warn!(op, error = %e, "router command failed, dropping session");
                *guard = None;
            }
        }
        result
    }

    /// Lists all interfaces with cumulative counters. Rates are zero; they
    /// come from `get_traffic_rates` probes.
    pub async fn list_interfaces(&self) -> Result<Vec<InterfaceSample>, RouterError> {
        let reply = self
            .run_command("list_interfaces", &["/interface/print"], CMD_DEADLINE)
            .await?;
        let now = Utc::now();
        Ok(reply
            .records
            .into_iter()
            .map(|r| InterfaceSample {
                name: r.get("name").cloned().unwrap_or_default(),
                rx_bytes: parse_u64(r.get("rx-byte").map(String::as_str).unwrap_or("")),
                tx_bytes: parse_u64(r.get("tx-byte").map(String::as_str).unwrap_or("")),
                rx_rate_mbps: 0.0,
                tx_rate_mbps: 0.0,
                running: r.get("running").map(String::as_str) == Some("true"),
                comment: r.get("comment").cloned().unwrap_or_default(),
                sampled_at: now,
            })
            .collect())
    }

    /// Fetches a single interface by name, or `NoData` if the router does
    /// not know it.
    pub async fn get_interface(&self, name: &str) -> Result<InterfaceSample, RouterError> {
        let query = format!("?name={name}");
        let reply = self
            .run_command("get_interface", &["/interface/print", &query], CMD_DEADLINE)
            .await?;
        let record = reply
            .records
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::NoData(name.to_string()))?;
        Ok(InterfaceSample {
            name: name.to_string(),
            rx_bytes: parse_u64(record.get("rx-byte").map(String::as_str).unwrap_or("")),
            tx_bytes: parse_u64(record.get("tx-byte").map(String::as_str).unwrap_or("")),
            rx_rate_mbps: 0.0,
            tx_rate_mbps: 0.0,
            running: record.get("running").map(String::as_str) == Some("true"),
            comment: record.get("comment").cloned().unwrap_or_default(),
            sampled_at: Utc::now(),
        })
    }

    /// Current rx/tx rates for one interface in Mbps. An empty monitor
    /// reply maps to `NoData`.
    pub async fn get_traffic_rates(&self, name: &str) -> Result<(f64, f64), RouterError> {
        let iface = format!("=interface={name}");
        let reply = self
            .run_command(
                "get_traffic_rates",
                &["/interface/monitor-traffic", &iface, "=once="],
                PROBE_DEADLINE,
            )
            .await?;
        let record = reply
            .records
            .first()
            .ok_or_else(|| RouterError::NoData(name.to_string()))?;
        let rx = parse_rate_mbps(record.get("rx-bits-per-second").map(String::as_str).unwrap_or(""));
        let tx = parse_rate_mbps(record.get("tx-bits-per-second").map(String::as_str).unwrap_or(""));
        Ok((rx, tx))
    }

    /// Identity, board and resource information. Only the identity query is
    /// required; resource and clock failures leave their fields empty.
    pub async fn get_system_info(&self) -> Result<SystemInfo, RouterError> {
        let mut info = SystemInfo::default();

        let reply = self
            .run_command("get_system_info", &["/system/identity/print"], CMD_DEADLINE)
            .await?;
        if let Some(r) = reply.records.first() {
            info.identity = r.get("name").cloned().unwrap_or_default();
        }

        if let Ok(reply) = self
            .run_command("get_system_info", &["/system/resource/print"], CMD_DEADLINE)
            .await
        {
            if let Some(r) = reply.records.first() {
                info.board_name = r.get("board-name").cloned().unwrap_or_default();
                info.version = r.get("version").cloned().unwrap_or_default();
                info.uptime = r.get("uptime").cloned().unwrap_or_default();
                if let Some(load) = r.get("cpu-load") {
                    info.cpu = format!("{load}%");
                }
                if let (Some(free), Some(total)) = (r.get("free-memory"), r.get("total-memory")) {
                    info.memory = format!("{free}/{total}");
                }
                if let (Some(free), Some(total)) =
                    (r.get("free-hdd-space"), r.get("total-hdd-space"))
                {
                    if !free.is_empty() && !total.is_empty() {
                        info.disk = format!("{free}/{total}");
                    }
                }
            }
        }

        if let Ok(reply) = self
            .run_command("get_system_info", &["/system/clock/print"], CMD_DEADLINE)
            .await
        {
            if let Some(r) = reply.records.first() {
                info.timezone = r.get("time-zone-name").cloned().unwrap_or_default();
            }
        }

        Ok(info)
    }

    /// Active default routes, for WAN detection.
    pub async fn get_routes(&self) -> Result<Vec<RouteEntry>, RouterError> {
        let reply = self
            .run_command(
                "get_routes",
                &["/ip/route/print", "?dst-address=0.0.0.0/0", "?active=true"],
                CMD_DEADLINE,
            )
            .await?;
        Ok(reply
            .records
            .into_iter()
            .map(|r| RouteEntry {
                dst_address: r.get("dst-address").cloned().unwrap_or_default(),
                gateway: r.get("gateway").cloned().unwrap_or_default(),
                immediate_gw: r.get("immediate-gw").cloned().unwrap_or_default(),
                interface: r.get("interface").cloned().unwrap_or_default(),
                active: r.get("active").map(String::as_str) == Some("true"),
            })
            .collect())
    }

    /// Wall-clock of the most recent reboot-class log line.
    pub async fn get_last_reboot_time(&self) -> Result<DateTime<Utc>, RouterError> {
        let reply = self
            .run_command("get_last_reboot_time", &["/log/print"], CMD_DEADLINE)
            .await?;
        let now = Utc::now();
        let latest = reply
            .records
            .iter()
            .filter(|r| {
                let topics = r.get("topics").map(String::as_str).unwrap_or("");
                let message = r.get("message").map(String::as_str).unwrap_or("");
                topics.contains("system")
                    && (message.contains("reboot")
                        || message.contains("started")
                        || message.contains("RouterOS"))
            })
            .filter_map(|r| parse_log_time(r.get("time").map(String::as_str).unwrap_or(""), now))
            .max();
        latest.ok_or_else(|| RouterError::NoData("reboot log".to_string()))
    }

    /// Cheap liveness probe; used to gate WAN detection attempts.
    pub async fn ping(&self) -> Result<(), RouterError> {
        self.run_command("ping", &["/system/resource/print"], PING_DEADLINE)
            .await
            .map(|_| ())
    }
}

/// Tolerant counter parsing: empty strings are zero, malformed values are
/// logged and become zero rather than failing the caller.
pub(crate) fn parse_u64(s: &str) -> u64 {
    if s.is_empty() {
        return 0;
    }
    match s.parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(value = s, "unparseable counter value, treating as 0");
            0
        }
    }
}

/// Converts a bits-per-second string into Mbps.
pub(crate) fn parse_rate_mbps(s: &str) -> f64 {
    let s = s.trim_end_matches("bps");
    if s.is_empty() {
        return 0.0;
    }
    s.parse::<f64>().map(|v| v / 1_000_000.0).unwrap_or(0.0)
}

/// Parses router log times. The usual form is `mmm/dd hh:mm:ss` without a
/// year; entries from today may carry only `hh:mm:ss`. A parsed time in the
/// future means the year wrapped, so step back one year.
pub(crate) fn parse_log_time(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(time) = chrono::NaiveTime::parse_from_str(s, "%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&now.date_naive().and_time(time)));
    }
    let with_year = format!("{s} {}", now.year());
    let parsed = NaiveDateTime::parse_from_str(&with_year, "%b/%d %H:%M:%S %Y").ok()?;
    let mut dt = Utc.from_utc_datetime(&parsed);
    if dt > now {
        dt = dt.with_year(dt.year() - 1)?;
    }
    Some(dt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_parse_tolerantly() {
        assert_eq!(parse_u64(""), 0);
        assert_eq!(parse_u64("12345"), 12345);
        assert_eq!(parse_u64("not-a-number"), 0);
    }

    #[test]
    fn rates_convert_to_mbps() {
        assert_eq!(parse_rate_mbps(""), 0.0);
        assert_eq!(parse_rate_mbps("1000000"), 1.0);
        assert_eq!(parse_rate_mbps("2500000bps"), 2.5);
    }

    #[test]
    fn log_time_parses_and_handles_year_wrap() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();

        let t = parse_log_time("jan/15 08:30:00", now).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2026, 1, 15, 8, 30, 0).unwrap());

        // December is in the future relative to February, so it was last year.
        let t = parse_log_time("dec/20 23:00:00", now).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2025, 12, 20, 23, 0, 0).unwrap());

        let t = parse_log_time("08:30:00", now).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2026, 2, 1, 8, 30, 0).unwrap());

        assert!(parse_log_time("", now).is_none());
        assert!(parse_log_time("garbage", now).is_none());
    }
}

//! Shared test support: a scripted RouterOS-speaking server that the real
//! client connects to over TCP, plus config and database helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::io::BufStream;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use monik::config::{MonitorConfig, RouterConfig, WorkerPoolConfig};
use monik::router::protocol::{read_sentence, write_sentence};

#[derive(Clone, Debug)]
pub struct FakeIface {
    pub name: String,
    pub rx_byte: u64,
    pub tx_byte: u64,
    pub running: bool,
    pub comment: String,
    pub rx_bps: u64,
    pub tx_bps: u64,
}

impl FakeIface {
    pub fn new(name: &str, rx_byte: u64, tx_byte: u64) -> Self {
        Self {
            name: name.to_string(),
            rx_byte,
            tx_byte,
            running: true,
            comment: String::new(),
            rx_bps: 0,
            tx_bps: 0,
        }
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    pub fn down(mut self) -> Self {
        self.running = false;
        self
    }

    pub fn rates(mut self, rx_bps: u64, tx_bps: u64) -> Self {
        self.rx_bps = rx_bps;
        self.tx_bps = tx_bps;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct FakeRoute {
    pub immediate_gw: String,
    pub interface: String,
}

#[derive(Default)]
pub struct RouterState {
    pub interfaces: Vec<FakeIface>,
    pub routes: Vec<FakeRoute>,
    /// (topics, message, time)
    pub log_entries: Vec<(String, String, String)>,
    pub reply_delay: Duration,
    pub reject_login: bool,
    /// Close each connection after this many command replies.
    pub drop_after_replies: Option<u32>,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub commands_seen: Vec<String>,
}

pub struct FakeRouter {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<RouterState>>,
    tasks: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeRouter {
    pub async fn start(state: RouterState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Self {
            addr,
            state: Arc::new(Mutex::new(state)),
            tasks: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        router.spawn_accept(listener);
        router
    }

    fn spawn_accept(&self, listener: TcpListener) {
        let state = Arc::clone(&self.state);
        let tasks = Arc::clone(&self.tasks);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let conn_state = Arc::clone(&state);
                let conn = tokio::spawn(async move { serve_connection(socket, conn_state).await });
                tasks.lock().unwrap().push(conn);
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    /// Tears the router down: stops accepting and severs live sessions.
    pub fn stop(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Brings the router back on the same address.
    pub async fn restart(&self) {
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.set_reuseaddr(true).unwrap();
        socket.bind(self.addr).unwrap();
        let listener = socket.listen(64).unwrap();
        self.spawn_accept(listener);
    }

    pub fn config(&self) -> RouterConfig {
        router_config(self.addr)
    }

    pub async fn set_counters(&self, name: &str, rx: u64, tx: u64) {
        let mut state = self.state.lock().await;
        if let Some(iface) = state.interfaces.iter_mut().find(|i| i.name == name) {
            iface.rx_byte = rx;
            iface.tx_byte = tx;
        }
    }

    pub async fn max_in_flight(&self) -> usize {
        self.state.lock().await.max_in_flight
    }
}

async fn serve_connection(socket: TcpStream, state: Arc<Mutex<RouterState>>) {
    let mut stream = BufStream::new(socket);
    let mut replies_sent = 0u32;
    loop {
        let Ok(words) = read_sentence(&mut stream).await else {
            return;
        };
        let Some(cmd) = words.first().cloned() else {
            continue;
        };

        if cmd == "/login" {
            let reject = state.lock().await.reject_login;
            if reject
                && write_sentence(
                    &mut stream,
                    &["!trap", "=message=invalid user name or password (6)"],
                )
                .await
                .is_err()
            {
                return;
            }
            if write_sentence(&mut stream, &["!done"]).await.is_err() {
                return;
            }
            continue;
        }

        let delay = {
            let mut st = state.lock().await;
            st.commands_seen.push(cmd.clone());
            st.in_flight += 1;
            st.max_in_flight = st.max_in_flight.max(st.in_flight);
            st.reply_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let sentences = {
            let mut st = state.lock().await;
            let reply = build_reply(&cmd, &words[1..], &st);
            st.in_flight -= 1;
            reply
        };
        for sentence in &sentences {
            let words: Vec<&str> = sentence.iter().map(String::as_str).collect();
            if write_sentence(&mut stream, &words).await.is_err() {
                return;
            }
        }

        replies_sent += 1;
        let drop_now = {
            let st = state.lock().await;
            st.drop_after_replies
                .map(|n| replies_sent >= n)
                .unwrap_or(false)
        };
        if drop_now {
            return;
        }
    }
}

fn build_reply(cmd: &str, args: &[String], state: &RouterState) -> Vec<Vec<String>> {
    let mut out: Vec<Vec<String>> = Vec::new();
    match cmd {
        "/interface/print" => {
            let name_filter = args
                .iter()
                .find_map(|w| w.strip_prefix("?name=").map(str::to_string));
            for iface in &state.interfaces {
                if let Some(filter) = &name_filter {
                    if *filter != iface.name {
                        continue;
                    }
                }
                out.push(vec![
                    "!re".to_string(),
                    format!("=name={}", iface.name),
                    format!("=rx-byte={}", iface.rx_byte),
                    format!("=tx-byte={}", iface.tx_byte),
                    format!("=running={}", iface.running),
                    format!("=comment={}", iface.comment),
                ]);
            }
        }
        "/interface/monitor-traffic" => {
            let target = args
                .iter()
                .find_map(|w| w.strip_prefix("=interface=").map(str::to_string));
            if let Some(target) = target {
                if let Some(iface) = state.interfaces.iter().find(|i| i.name == target) {
                    if iface.rx_bps > 0 || iface.tx_bps > 0 {
                        out.push(vec![
                            "!re".to_string(),
                            format!("=name={}", iface.name),
                            format!("=rx-bits-per-second={}", iface.rx_bps),
                            format!("=tx-bits-per-second={}", iface.tx_bps),
                        ]);
                    }
                }
            }
        }
        "/ip/route/print" => {
            for route in &state.routes {
                out.push(vec![
                    "!re".to_string(),
                    "=dst-address=0.0.0.0/0".to_string(),
                    format!("=immediate-gw={}", route.immediate_gw),
                    format!("=interface={}", route.interface),
                    "=active=true".to_string(),
                ]);
            }
        }
        "/system/identity/print" => {
            out.push(vec!["!re".to_string(), "=name=edge-router".to_string()]);
        }
        "/system/resource/print" => {
            out.push(vec![
                "!re".to_string(),
                "=board-name=RB4011iGS+".to_string(),
                "=version=7.15.2".to_string(),
                "=uptime=1w2d3h".to_string(),
                "=cpu-load=4".to_string(),
                "=free-memory=734003200".to_string(),
                "=total-memory=1073741824".to_string(),
            ]);
        }
        "/system/clock/print" => {
            out.push(vec![
                "!re".to_string(),
                "=time-zone-name=Asia/Jakarta".to_string(),
            ]);
        }
        "/log/print" => {
            for (topics, message, time) in &state.log_entries {
                out.push(vec![
                    "!re".to_string(),
                    format!("=topics={topics}"),
                    format!("=message={message}"),
                    format!("=time={time}"),
                ]);
            }
        }
        _ => {}
    }
    out.push(vec!["!done".to_string()]);
    out
}

pub fn router_config(addr: SocketAddr) -> RouterConfig {
    RouterConfig {
        ip: addr.ip().to_string(),
        port: addr.port(),
        username: "admin".to_string(),
        password: String::new(),
        timeout: Duration::from_secs(2),
    }
}

/// An address nothing listens on, for unreachable-router cases.
pub fn unreachable_config() -> RouterConfig {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    router_config(addr)
}

/// In-memory SQLite with the schema applied. Single connection, since each
/// in-memory connection is its own database.
pub async fn mem_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    monik::db::run_migrations(&db).await.unwrap();
    db
}

pub fn worker_config() -> WorkerPoolConfig {
    WorkerPoolConfig {
        max_workers: 2,
        queue_size: 32,
        worker_timeout: Duration::from_secs(5),
        load_threshold: 0.8,
        load_balancing_strategy: "round_robin".to_string(),
        circuit_breaker_enabled: true,
        circuit_breaker_failure_threshold: 5,
        circuit_breaker_recovery_timeout: Duration::from_secs(60),
        circuit_breaker_half_open_max_calls: 3,
    }
}

pub fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        interval: Duration::from_secs(10),
        tick_deadline: Duration::from_secs(25),
        snapshot_interface: "xether2".to_string(),
    }
}

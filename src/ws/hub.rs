//! In-process pub/sub hub. Producers push into a bounded ingress queue;
//! one fan-out task delivers to per-client bounded queues. A full queue
//! drops the message for that client only and bumps a counter, so a slow
//! dashboard can never stall the collector.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{data_frame, event_frame, BroadcastMessage, EventMessage, RealTimeData};

#[derive(Debug, Default)]
pub struct WsMetrics {
    messages_sent: AtomicI64,
    messages_dropped: AtomicI64,
    broadcasts_sent: AtomicI64,
    broadcasts_dropped: AtomicI64,
    events_sent: AtomicI64,
    events_dropped: AtomicI64,
    connections_total: AtomicI64,
    disconnections_total: AtomicI64,
}

impl WsMetrics {
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_disconnection(&self) {
        self.disconnections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_sent(&self) -> i64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
    pub fn messages_dropped(&self) -> i64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Value {
        let sent = self.messages_sent.load(Ordering::Relaxed);
        let dropped = self.messages_dropped.load(Ordering::Relaxed);
        serde_json::json!({
            "messages_sent": sent,
            "messages_dropped": dropped,
            "broadcasts_sent": self.broadcasts_sent.load(Ordering::Relaxed),
            "broadcasts_dropped": self.broadcasts_dropped.load(Ordering::Relaxed),
            "events_sent": self.events_sent.load(Ordering::Relaxed),
            "events_dropped": self.events_dropped.load(Ordering::Relaxed),
            "connections_total": self.connections_total.load(Ordering::Relaxed),
            "disconnections_total": self.disconnections_total.load(Ordering::Relaxed),
            "drop_rate": dropped as f64 / (sent + dropped + 1) as f64,
        })
    }
}

struct ClientHandle {
    sender: mpsc::Sender<String>,
    connected_at: DateTime<Utc>,
}

pub struct WsHub {
    clients: DashMap<Uuid, ClientHandle>,
    subscriptions: RwLock<HashMap<String, HashSet<Uuid>>>,
    ingress_tx: mpsc::Sender<BroadcastMessage>,
    ingress_rx: Mutex<Option<mpsc::Receiver<BroadcastMessage>>>,
    metrics: WsMetrics,
    client_buffer: usize,
}

impl WsHub {
    pub fn new(broadcast_buffer: usize, client_buffer: usize) -> Arc<Self> {
        let (ingress_tx, ingress_rx) = mpsc::channel(broadcast_buffer);
        Arc::new(Self {
            clients: DashMap::new(),
            subscriptions: RwLock::new(HashMap::new()),
            ingress_tx,
            ingress_rx: Mutex::new(Some(ingress_rx)),
            metrics: WsMetrics::default(),
            client_buffer,
        })
    }

    /// Spawns the fan-out task. Call once after construction.
    pub fn start(self: &Arc<Self>) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = hub
                .ingress_rx
                .lock()
                .await
                .take()
                .expect("hub fan-out task started twice");
            info!("websocket hub started");
            while let Some(message) = rx.recv().await {
                hub.fan_out(message);
            }
        });
    }

    fn fan_out(&self, message: BroadcastMessage) {
        match message {
            BroadcastMessage::Data(data) => {
                let targets: Vec<Uuid> = {
                    let subs = self.subscriptions.read().unwrap();
                    match subs.get(&data.interface_name) {
                        Some(ids) => ids.iter().copied().collect(),
                        None => return,
                    }
                };
                let frame = data_frame(&data);
                for id in targets {
                    self.deliver(id, &frame);
                }
            }
            BroadcastMessage::Event(event) => {
                let frame = event_frame(&event);
                let ids: Vec<Uuid> = self.clients.iter().map(|entry| *entry.key()).collect();
                for id in ids {
                    self.deliver(id, &frame);
                }
            }
        }
    }

    fn deliver(&self, id: Uuid, frame: &str) {
        if let Some(client) = self.clients.get(&id) {
            match client.sender.try_send(frame.to_owned()) {
                Ok(()) => self.metrics.record_message_sent(),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.metrics.record_message_dropped();
                    debug!(client = %id, "client queue full, dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Queues a data message for subscribed clients. Never blocks; a full
    /// ingress queue drops the message and counts it.
    pub fn broadcast_data(&self, data: RealTimeData) {
        match self.ingress_tx.try_send(BroadcastMessage::Data(data)) {
            Ok(()) => {
                self.metrics.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.metrics
                    .broadcasts_dropped
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "broadcast queue full, dropping data message");
            }
        }
    }

    /// Queues an event for every connected client.
    pub fn broadcast_event(&self, event: &str, message: &str, data: Value) {
        let msg = BroadcastMessage::Event(EventMessage {
            event: event.to_owned(),
            message: message.to_owned(),
            timestamp: Utc::now(),
            data,
        });
        match self.ingress_tx.try_send(msg) {
            Ok(()) => {
                self.metrics.events_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(event, "broadcast queue full, dropping event");
            }
        }
    }

    /// Registers a new client session and returns its id plus the egress
    /// queue the session's writer drains.
    pub fn register(&self) -> (Uuid, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.client_buffer);
        self.clients.insert(
            id,
            ClientHandle {
                sender: tx,
                connected_at: Utc::now(),
            },
        );
        self.metrics.record_connection();
        (id, rx)
    }

    /// Removes a client and all of its subscriptions.
    pub fn unregister(&self, id: Uuid) {
        self.clients.remove(&id);
        let mut subs = self.subscriptions.write().unwrap();
        subs.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
        self.metrics.record_disconnection();
    }

    pub fn subscribe(&self, id: Uuid, interfaces: &[String]) {
        let mut subs = self.subscriptions.write().unwrap();
        for name in interfaces {
            subs.entry(name.clone()).or_default().insert(id);
        }
    }

    pub fn unsubscribe(&self, id: Uuid, interfaces: &[String]) {
        let mut subs = self.subscriptions.write().unwrap();
        for name in interfaces {
            if let Some(ids) = subs.get_mut(name) {
                ids.remove(&id);
                if ids.is_empty() {
                    subs.remove(name);
                }
            }
        }
    }

    /// Pushes a control reply into one client's egress queue so replies
    /// keep their order relative to broadcast frames.
    pub fn send_to_client(&self, id: Uuid, frame: String) {
        if let Some(client) = self.clients.get(&id) {
            if client.sender.try_send(frame).is_err() {
                self.metrics.record_message_dropped();
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn connected_at(&self, id: Uuid) -> Option<DateTime<Utc>> {
        self.clients.get(&id).map(|c| c.connected_at)
    }

    /// Interface name -> subscriber count, for the stats endpoint.
    pub fn subscription_counts(&self) -> HashMap<String, usize> {
        let subs = self.subscriptions.read().unwrap();
        subs.iter().map(|(k, v)| (k.clone(), v.len())).collect()
    }

    pub fn metrics(&self) -> &WsMetrics {
        &self.metrics
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_TRAFFIC: &str = "traffic";
pub const EVENT_COUNTER_RESET: &str = "counter_reset";
pub const EVENT_REBOOT: &str = "reboot";
pub const EVENT_WAN_DETECTED: &str = "wan_detected";
pub const EVENT_INTERFACE_UP: &str = "interface_up";
pub const EVENT_INTERFACE_DOWN: &str = "interface_down";
pub const EVENT_METRICS_UPDATE: &str = "metrics_update";

/// One realtime traffic observation, delivered to clients subscribed to
/// the interface.
#[derive(Clone, Debug, Serialize)]
pub struct RealTimeData {
    pub interface_name: String,
    pub rx_rate: f64,
    pub tx_rate: f64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub status: String,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
}

/// A system event, delivered to every connected client.
#[derive(Clone, Debug, Serialize)]
pub struct EventMessage {
    pub event: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

/// What producers push into the hub's ingress queue.
#[derive(Clone, Debug)]
pub enum BroadcastMessage {
    Data(RealTimeData),
    Event(EventMessage),
}

/// Control messages clients send over the socket.
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

pub fn data_frame(data: &RealTimeData) -> String {
    serde_json::json!({
        "type": "data",
        "interface": data.interface_name,
        "rx_rate": data.rx_rate,
        "tx_rate": data.tx_rate,
        "rx_bytes": data.rx_bytes,
        "tx_bytes": data.tx_bytes,
        "status": data.status,
        "comment": data.comment,
        "timestamp": data.timestamp,
        "event_type": data.event_type,
    })
    .to_string()
}

pub fn event_frame(event: &EventMessage) -> String {
    serde_json::json!({
        "type": "event",
        "event": event.event,
        "message": event.message,
        "timestamp": event.timestamp,
        "data": event.data,
    })
    .to_string()
}

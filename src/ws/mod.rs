pub mod handler;
pub mod hub;
pub mod models;

pub use hub::WsHub;
pub use models::{BroadcastMessage, EventMessage, RealTimeData};

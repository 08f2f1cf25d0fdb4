pub mod counter_reset_log;
pub mod interface;
pub mod monthly_quota;
pub mod system_info;
pub mod traffic_snapshot;

pub mod prelude {
    pub use super::counter_reset_log::Entity as CounterResetLog;
    pub use super::interface::Entity as Interface;
    pub use super::monthly_quota::Entity as MonthlyQuota;
    pub use super::system_info::Entity as SystemInfo;
    pub use super::traffic_snapshot::Entity as TrafficSnapshot;
}

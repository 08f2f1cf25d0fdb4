pub mod interface_service;
pub mod quota_service;
pub mod reset_service;
pub mod snapshot_service;
pub mod system_info_service;

pub mod config;
pub mod db;
pub mod metrics;
pub mod monitor;
pub mod router;
pub mod wan;
pub mod web;
pub mod worker;
pub mod ws;

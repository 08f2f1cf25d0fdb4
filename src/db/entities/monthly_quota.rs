use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-day usage accumulation bucket, unique per
/// `(interface_name, year, month, day)`.
///
/// `last_rx_bytes`/`last_tx_bytes` cache the cumulative counters seen at
/// the most recent write; they are only a baseline for delta computation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monthly_quotas")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub interface_name: String,
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub rx_bytes: i64,
    pub tx_bytes: i64,
    pub total_bytes: i64,
    pub total_rx: i64,
    pub total_tx: i64,
    pub last_rx_bytes: i64,
    pub last_tx_bytes: i64,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

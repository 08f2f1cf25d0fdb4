use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only historical traffic point for the snapshot subject.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "traffic_snapshots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub interface_name: String,
    pub timestamp: ChronoDateTimeUtc,
    pub rx_bytes: i64,
    pub tx_bytes: i64,
    pub rx_rate: f64,
    pub tx_rate: f64,
    pub total_bytes: i64,
    pub counter_reset: bool,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

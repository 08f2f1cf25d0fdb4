use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Last-known state of one router interface, keyed by name. Rows are
/// created on first sight and updated every collection tick.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "interfaces")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub interface_name: String,
    pub rx_bytes: i64,
    pub tx_bytes: i64,
    pub rx_rate: f64,
    pub tx_rate: f64,
    pub last_seen: ChronoDateTimeUtc,
    pub counter_reset_count: i32,
    pub status: String,
    pub comment: String,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

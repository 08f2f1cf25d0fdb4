use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Latest system information reported by the router.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "system_info")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub identity: String,
    pub board_name: String,
    pub version: String,
    pub uptime: String,
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    pub timezone: String,
    pub last_updated: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

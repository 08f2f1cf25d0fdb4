use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One detected counter reset. Exactly one row per reset observation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "counter_reset_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub interface_name: String,
    pub reset_time: ChronoDateTimeUtc,
    pub previous_bytes: i64,
    pub new_bytes: i64,
    pub detection_method: String,
    pub notes: String,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

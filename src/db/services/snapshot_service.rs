use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};

use crate::db::entities::traffic_snapshot;

#[allow(clippy::too_many_arguments)]
pub async fn insert_snapshot(
    db: &DatabaseConnection,
    name: &str,
    timestamp: DateTime<Utc>,
    rx_bytes: u64,
    tx_bytes: u64,
    rx_rate: f64,
    tx_rate: f64,
    counter_reset: bool,
) -> Result<(), DbErr> {
    let model = traffic_snapshot::ActiveModel {
        interface_name: Set(name.to_owned()),
        timestamp: Set(timestamp),
        rx_bytes: Set(rx_bytes as i64),
        tx_bytes: Set(tx_bytes as i64),
        rx_rate: Set(rx_rate),
        tx_rate: Set(tx_rate),
        total_bytes: Set((rx_bytes + tx_bytes) as i64),
        counter_reset: Set(counter_reset),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    model.insert(db).await?;
    Ok(())
}

pub async fn latest_snapshot(
    db: &DatabaseConnection,
    name: &str,
) -> Result<Option<traffic_snapshot::Model>, DbErr> {
    traffic_snapshot::Entity::find()
        .filter(traffic_snapshot::Column::InterfaceName.eq(name))
        .order_by_desc(traffic_snapshot::Column::Timestamp)
        .one(db)
        .await
}

/// Most recent snapshots for one interface, newest first.
pub async fn history(
    db: &DatabaseConnection,
    name: &str,
    limit: u64,
) -> Result<Vec<traffic_snapshot::Model>, DbErr> {
    traffic_snapshot::Entity::find()
        .filter(traffic_snapshot::Column::InterfaceName.eq(name))
        .order_by_desc(traffic_snapshot::Column::Timestamp)
        .limit(limit)
        .all(db)
        .await
}

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::db::entities::interface;

/// Creates or refreshes the row for one interface. Conflict on the name
/// updates counters, rates, status, comment and timestamps; the reset
/// counter is bumped separately by `increment_reset_count`.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_interface(
    db: &DatabaseConnection,
    name: &str,
    rx_bytes: u64,
    tx_bytes: u64,
    rx_rate: f64,
    tx_rate: f64,
    status: &str,
    comment: &str,
    last_seen: DateTime<Utc>,
) -> Result<(), DbErr> {
    let now = Utc::now();
    let model = interface::ActiveModel {
        interface_name: Set(name.to_owned()),
        rx_bytes: Set(rx_bytes as i64),
        tx_bytes: Set(tx_bytes as i64),
        rx_rate: Set(rx_rate),
        tx_rate: Set(tx_rate),
        last_seen: Set(last_seen),
        counter_reset_count: Set(0),
        status: Set(status.to_owned()),
        comment: Set(comment.to_owned()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    interface::Entity::insert(model)
        .on_conflict(
            OnConflict::column(interface::Column::InterfaceName)
                .update_columns([
                    interface::Column::RxBytes,
                    interface::Column::TxBytes,
                    interface::Column::RxRate,
                    interface::Column::TxRate,
                    interface::Column::LastSeen,
                    interface::Column::Status,
                    interface::Column::Comment,
                    interface::Column::UpdatedAt,
                ])
                .to_owned(),
        )
        .exec(db)
        .await?;
    Ok(())
}

pub async fn increment_reset_count(db: &DatabaseConnection, name: &str) -> Result<(), DbErr> {
    interface::Entity::update_many()
        .col_expr(
            interface::Column::CounterResetCount,
            Expr::col(interface::Column::CounterResetCount).add(1),
        )
        .filter(interface::Column::InterfaceName.eq(name))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn get_interface(
    db: &DatabaseConnection,
    name: &str,
) -> Result<Option<interface::Model>, DbErr> {
    interface::Entity::find()
        .filter(interface::Column::InterfaceName.eq(name))
        .one(db)
        .await
}

/// All known interfaces, ordered by name for stable UI output.
pub async fn list_interfaces(db: &DatabaseConnection) -> Result<Vec<interface::Model>, DbErr> {
    interface::Entity::find()
        .order_by_asc(interface::Column::InterfaceName)
        .all(db)
        .await
}

/// Offline path: zero the rates and touch `last_seen` on every known row.
/// Returns the rows as they were before the update so callers can feed the
/// preserved cumulative counters into the quota updater.
pub async fn mark_all_offline(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
) -> Result<Vec<interface::Model>, DbErr> {
    let known = interface::Entity::find().all(db).await?;
    if known.is_empty() {
        return Ok(known);
    }
    interface::Entity::update_many()
        .col_expr(interface::Column::RxRate, Expr::value(0.0))
        .col_expr(interface::Column::TxRate, Expr::value(0.0))
        .col_expr(interface::Column::LastSeen, Expr::value(now))
        .col_expr(interface::Column::UpdatedAt, Expr::value(now))
        .exec(db)
        .await?;
    Ok(known)
}

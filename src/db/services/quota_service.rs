use chrono::{DateTime, Datelike, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use tracing::{debug, warn};

use crate::db::entities::monthly_quota;

/// Computes the day-bucket delta for freshly observed cumulative counters.
///
/// A detected reset, or either counter regressing below its cached
/// baseline, means the router started counting from zero again: the current
/// values are themselves the traffic accumulated since, so they become the
/// delta. Otherwise the delta is the plain difference against the baseline.
pub fn reset_safe_delta(
    cur_rx: u64,
    cur_tx: u64,
    last_rx: u64,
    last_tx: u64,
    counter_reset: bool,
) -> (u64, u64) {
    if counter_reset || cur_rx < last_rx || cur_tx < last_tx {
        (cur_rx, cur_tx)
    } else {
        (cur_rx - last_rx, cur_tx - last_tx)
    }
}

/// Returns the quota row for `(name, year, month, day)`, creating it with
/// zero deltas and the supplied counters as baseline when absent. The
/// second tuple element is true when the row was created on this call.
pub async fn get_or_init_quota(
    db: &DatabaseConnection,
    name: &str,
    year: i32,
    month: u32,
    day: u32,
    baseline_rx: u64,
    baseline_tx: u64,
) -> Result<(monthly_quota::Model, bool), DbErr> {
    if let Some(existing) = find_quota(db, name, year, month, day).await? {
        return Ok((existing, false));
    }

    let now = Utc::now();
    let model = monthly_quota::ActiveModel {
        interface_name: Set(name.to_owned()),
        year: Set(year),
        month: Set(month as i32),
        day: Set(day as i32),
        rx_bytes: Set(0),
        tx_bytes: Set(0),
        total_bytes: Set(0),
        total_rx: Set(0),
        total_tx: Set(0),
        last_rx_bytes: Set(baseline_rx as i64),
        last_tx_bytes: Set(baseline_tx as i64),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let created = model.insert(db).await?;
    debug!(
        interface = name,
        year, month, day, baseline_rx, baseline_tx, "created quota day row"
    );
    Ok((created, true))
}

/// Adds a delta to one day row and refreshes the counter baseline. Single
/// UPDATE, so row atomicity holds; the caller serializes read-modify-write
/// through the collector's writer lock.
pub async fn apply_quota_delta(
    db: &DatabaseConnection,
    row: monthly_quota::Model,
    delta_rx: u64,
    delta_tx: u64,
    new_last_rx: u64,
    new_last_tx: u64,
) -> Result<(), DbErr> {
    let rx = row.rx_bytes + delta_rx as i64;
    let tx = row.tx_bytes + delta_tx as i64;
    let total_rx = row.total_rx + delta_rx as i64;
    let total_tx = row.total_tx + delta_tx as i64;

    let mut active = row.into_active_model();
    active.rx_bytes = Set(rx);
    active.tx_bytes = Set(tx);
    active.total_bytes = Set(rx + tx);
    active.total_rx = Set(total_rx);
    active.total_tx = Set(total_tx);
    active.last_rx_bytes = Set(new_last_rx as i64);
    active.last_tx_bytes = Set(new_last_tx as i64);
    active.updated_at = Set(Utc::now());
    active.update(db).await?;
    Ok(())
}

/// The monthly-quota updater: creates the day row on first sight of the
/// date (no delta on the creation tick), otherwise accumulates the
/// reset-safe delta and refreshes the baseline.
pub async fn update_quota(
    db: &DatabaseConnection,
    name: &str,
    cur_rx: u64,
    cur_tx: u64,
    counter_reset: bool,
    now: DateTime<Utc>,
) -> Result<(), DbErr> {
    let (year, month, day) = (now.year(), now.month(), now.day());

    let (row, created) =
        get_or_init_quota(db, name, year, month, day, cur_rx, cur_tx).await?;
    if created {
        return Ok(());
    }

    let (delta_rx, delta_tx) = reset_safe_delta(
        cur_rx,
        cur_tx,
        row.last_rx_bytes as u64,
        row.last_tx_bytes as u64,
        counter_reset,
    );
    if counter_reset || cur_rx < row.last_rx_bytes as u64 || cur_tx < row.last_tx_bytes as u64 {
        warn!(
            interface = name,
            cur_rx,
            cur_tx,
            last_rx = row.last_rx_bytes,
            last_tx = row.last_tx_bytes,
            "counter regression, taking current values as delta"
        );
    }
    apply_quota_delta(db, row, delta_rx, delta_tx, cur_rx, cur_tx).await
}

pub async fn find_quota(
    db: &DatabaseConnection,
    name: &str,
    year: i32,
    month: u32,
    day: u32,
) -> Result<Option<monthly_quota::Model>, DbErr> {
    monthly_quota::Entity::find()
        .filter(monthly_quota::Column::InterfaceName.eq(name))
        .filter(monthly_quota::Column::Year.eq(year))
        .filter(monthly_quota::Column::Month.eq(month as i32))
        .filter(monthly_quota::Column::Day.eq(day as i32))
        .one(db)
        .await
}

/// All day rows for one interface and month, ascending by day.
pub async fn monthly_usage(
    db: &DatabaseConnection,
    name: &str,
    year: i32,
    month: u32,
) -> Result<Vec<monthly_quota::Model>, DbErr> {
    monthly_quota::Entity::find()
        .filter(monthly_quota::Column::InterfaceName.eq(name))
        .filter(monthly_quota::Column::Year.eq(year))
        .filter(monthly_quota::Column::Month.eq(month as i32))
        .order_by_asc(monthly_quota::Column::Day)
        .all(db)
        .await
}

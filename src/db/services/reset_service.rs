use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::db::entities::counter_reset_log;

pub async fn insert_reset_log(
    db: &DatabaseConnection,
    name: &str,
    reset_time: DateTime<Utc>,
    previous_bytes: u64,
    new_bytes: u64,
    detection_method: &str,
    notes: &str,
) -> Result<(), DbErr> {
    let model = counter_reset_log::ActiveModel {
        interface_name: Set(name.to_owned()),
        reset_time: Set(reset_time),
        previous_bytes: Set(previous_bytes as i64),
        new_bytes: Set(new_bytes as i64),
        detection_method: Set(detection_method.to_owned()),
        notes: Set(notes.to_owned()),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    model.insert(db).await?;
    Ok(())
}

pub async fn list_reset_logs(
    db: &DatabaseConnection,
    name: &str,
) -> Result<Vec<counter_reset_log::Model>, DbErr> {
    counter_reset_log::Entity::find()
        .filter(counter_reset_log::Column::InterfaceName.eq(name))
        .order_by_desc(counter_reset_log::Column::ResetTime)
        .all(db)
        .await
}

/// Test hook used by the populate-test-data endpoint: seeds one fixture
/// reset log so the dashboard has something to render.
pub async fn populate_fixture_reset_logs(db: &DatabaseConnection) -> Result<(), DbErr> {
    insert_reset_log(
        db,
        "xether2",
        Utc::now() - chrono::Duration::hours(1),
        5_000_000,
        100,
        "manual_test",
        "",
    )
    .await
}

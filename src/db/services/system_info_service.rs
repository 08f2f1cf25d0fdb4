use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel, QueryOrder, Set,
};

use crate::db::entities::system_info;
use crate::router::SystemInfo;

/// Refreshes the single system-info row from a router reply.
pub async fn upsert_system_info(
    db: &DatabaseConnection,
    info: &SystemInfo,
    now: DateTime<Utc>,
) -> Result<(), DbErr> {
    let existing = system_info::Entity::find().one(db).await?;
    match existing {
        Some(row) => {
            let mut active = row.into_active_model();
            active.identity = Set(info.identity.clone());
            active.board_name = Set(info.board_name.clone());
            active.version = Set(info.version.clone());
            active.uptime = Set(info.uptime.clone());
            active.cpu = Set(info.cpu.clone());
            active.memory = Set(info.memory.clone());
            active.disk = Set(info.disk.clone());
            active.timezone = Set(info.timezone.clone());
            active.last_updated = Set(now);
            active.update(db).await?;
        }
        None => {
            let model = system_info::ActiveModel {
                identity: Set(info.identity.clone()),
                board_name: Set(info.board_name.clone()),
                version: Set(info.version.clone()),
                uptime: Set(info.uptime.clone()),
                cpu: Set(info.cpu.clone()),
                memory: Set(info.memory.clone()),
                disk: Set(info.disk.clone()),
                timezone: Set(info.timezone.clone()),
                last_updated: Set(now),
                ..Default::default()
            };
            model.insert(db).await?;
        }
    }
    Ok(())
}

pub async fn latest_system_info(
    db: &DatabaseConnection,
) -> Result<Option<system_info::Model>, DbErr> {
    system_info::Entity::find()
        .order_by_desc(system_info::Column::LastUpdated)
        .one(db)
        .await
}

use chrono::{DateTime, Utc};
use sea_orm::{
    prelude::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::db::entities::container;
use crate::db::enums::ContainerStatus;

pub async fn insert_container<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
    user_id: Uuid,
    host_id: Uuid,
    status: ContainerStatus,
    now: DateTime<Utc>,
) -> Result<container::Model, DbErr> {
    container::ActiveModel {
        id: Set(id),
        user_id: Set(user_id),
        host_id: Set(host_id),
        name: Set(id.to_string()),
        status: Set(status),
        created_at: Set(now),
    }
    .insert(conn)
    .await
}

pub async fn find_container<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<Option<container::Model>, DbErr> {
    container::Entity::find_by_id(id).one(conn).await
}

pub async fn list_containers(db: &DatabaseConnection) -> Result<Vec<container::Model>, DbErr> {
    container::Entity::find()
        .order_by_asc(container::Column::CreatedAt)
        .order_by_asc(container::Column::Id)
        .all(db)
        .await
}

pub async fn list_containers_on_host(db: &DatabaseConnection, host_id: Uuid) -> Result<Vec<container::Model>, DbErr> {
    container::Entity::find()
        .filter(container::Column::HostId.eq(host_id))
        .order_by_asc(container::Column::CreatedAt)
        .all(db)
        .await
}

pub async fn set_status<C: ConnectionTrait>(conn: &C, id: Uuid, status: ContainerStatus) -> Result<u64, DbErr> {
    let result = container::Entity::update_many()
        .col_expr(
            container::Column::Status,
            Expr::value(sea_orm::Value::String(Some(Box::new(status.to_value())))),
        )
        .filter(container::Column::Id.eq(id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

pub async fn delete_container<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<u64, DbErr> {
    let result = container::Entity::delete_by_id(id).exec(conn).await?;
    Ok(result.rows_affected)
}

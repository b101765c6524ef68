use chrono::{DateTime, Utc};
use sea_orm::{
    prelude::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::db::entities::api_key;
use crate::db::enums::ApiKeyOwner;
use crate::services::auth_service::hash_key;

/// Stores the hash of a freshly issued key. The plain key is never persisted here.
pub async fn insert_key<C: ConnectionTrait>(
    conn: &C,
    owner_type: ApiKeyOwner,
    owner_id: Uuid,
    key: &str,
    now: DateTime<Utc>,
) -> Result<api_key::Model, DbErr> {
    api_key::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_type: Set(owner_type),
        owner_id: Set(owner_id),
        key_hash: Set(hash_key(key)),
        created_at: Set(now),
        expires_at: Set(None),
    }
    .insert(conn)
    .await
}

pub async fn find_by_key<C: ConnectionTrait>(conn: &C, key: &str) -> Result<Option<api_key::Model>, DbErr> {
    api_key::Entity::find()
        .filter(api_key::Column::KeyHash.eq(hash_key(key)))
        .one(conn)
        .await
}

/// Expires every open-ended key of an owner. Returns the number of keys revoked.
pub async fn expire_keys_for_owner<C: ConnectionTrait>(
    conn: &C,
    owner_type: ApiKeyOwner,
    owner_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64, DbErr> {
    let result = api_key::Entity::update_many()
        .col_expr(
            api_key::Column::ExpiresAt,
            Expr::value(sea_orm::Value::ChronoDateTimeUtc(Some(Box::new(now)))),
        )
        .filter(api_key::Column::OwnerType.eq(owner_type))
        .filter(api_key::Column::OwnerId.eq(owner_id))
        .filter(api_key::Column::ExpiresAt.is_null())
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

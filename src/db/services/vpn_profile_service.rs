use chrono::{DateTime, Utc};
use sea_orm::{
    prelude::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QuerySelect,
    Set,
};
use uuid::Uuid;

use crate::db::entities::vpn_profile;

/// The unrevoked profile of `client_name`, if any. At most one exists.
pub async fn active_profile<C: ConnectionTrait>(
    conn: &C,
    client_name: &str,
) -> Result<Option<vpn_profile::Model>, DbErr> {
    vpn_profile::Entity::find()
        .filter(vpn_profile::Column::ClientName.eq(client_name))
        .filter(vpn_profile::Column::Revoked.eq(false))
        .one(conn)
        .await
}

/// Addresses currently held by unrevoked profiles.
pub async fn active_addresses<C: ConnectionTrait>(conn: &C) -> Result<Vec<String>, DbErr> {
    vpn_profile::Entity::find()
        .select_only()
        .column(vpn_profile::Column::IpAddress)
        .filter(vpn_profile::Column::Revoked.eq(false))
        .into_tuple::<String>()
        .all(conn)
        .await
}

pub async fn insert_profile<C: ConnectionTrait>(
    conn: &C,
    client_name: &str,
    ip_address: &str,
    config_path: &str,
    now: DateTime<Utc>,
) -> Result<vpn_profile::Model, DbErr> {
    vpn_profile::ActiveModel {
        id: Set(Uuid::new_v4()),
        client_name: Set(client_name.to_owned()),
        ip_address: Set(ip_address.to_owned()),
        config_path: Set(config_path.to_owned()),
        revoked: Set(false),
        created_at: Set(now),
    }
    .insert(conn)
    .await
}

/// Tombstones every active profile of `client_name`. Returns the number of rows revoked.
pub async fn revoke_profiles<C: ConnectionTrait>(conn: &C, client_name: &str) -> Result<u64, DbErr> {
    let result = vpn_profile::Entity::update_many()
        .col_expr(vpn_profile::Column::Revoked, Expr::value(true))
        .filter(vpn_profile::Column::ClientName.eq(client_name))
        .filter(vpn_profile::Column::Revoked.eq(false))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

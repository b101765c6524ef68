use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

// Rows are tombstoned through `revoked`, never deleted. Uniqueness of the active
// client_name / ip_address is enforced by partial indexes created in `db::schema`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "vpn_profiles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub client_name: String,
    pub ip_address: String,
    pub config_path: String,
    pub revoked: bool,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::HostStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "container_hosts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub hostname: String,
    pub ip: String,
    pub ssh_port: i32,
    pub api_port: i32,
    pub max_containers: i32,
    pub current_containers: i32,
    // Count the host itself reported on its last heartbeat; placement uses `current_containers`.
    pub reported_containers: i32,
    pub cpu_percent: i32,
    pub mem_percent: i32,
    pub status: HostStatus,
    pub last_seen: Option<ChronoDateTimeUtc>,
    #[serde(skip_serializing)]
    pub cred_ref: Option<String>,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::container::Entity")]
    Containers,
}

impl Related<super::container::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Containers.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

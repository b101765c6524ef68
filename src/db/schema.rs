use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, Schema};
use tracing::info;

use crate::db::entities::{api_key, container, host, user, vpn_profile};

// Partial indexes are not expressible through the entity derive; both Postgres
// and SQLite accept this syntax.
const PARTIAL_INDEXES: [&str; 2] = [
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_vpn_profiles_active_client \
     ON vpn_profiles (client_name) WHERE revoked = false",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_vpn_profiles_active_ip \
     ON vpn_profiles (ip_address) WHERE revoked = false",
];

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }
    Ok(())
}

/// Creates every control-plane table and index that does not exist yet.
pub async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, user::Entity).await?;
    create_table(db, &schema, api_key::Entity).await?;
    create_table(db, &schema, host::Entity).await?;
    create_table(db, &schema, container::Entity).await?;
    create_table(db, &schema, vpn_profile::Entity).await?;

    for sql in PARTIAL_INDEXES {
        db.execute_unprepared(sql).await?;
    }

    info!("Database schema is up to date.");
    Ok(())
}

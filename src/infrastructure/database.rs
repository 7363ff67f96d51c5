use crate::config::AccessConfig;
use crate::entities::{
    access_capabilities, assets, audit_logs, client_memberships, provider_credentials,
    thumbnail_cache, users,
};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::time::Duration;
use tracing::info;

pub async fn setup_database(config: &AccessConfig) -> anyhow::Result<DatabaseConnection> {
    let db_url = &config.database_url;

    info!("📂 Database: {}", db_url);

    let mut opt = ConnectOptions::new(db_url);
    if db_url.contains(":memory:") {
        // Every pooled connection would get its own empty in-memory database.
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(100).min_connections(5);
    }
    opt.connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    info!("✅ Database connected successfully");

    run_migrations(&db).await?;

    Ok(db)
}

/// Create every table from its entity definition. Parents come before the
/// tables that reference them.
pub async fn run_migrations(db: &DatabaseConnection) -> anyhow::Result<()> {
    info!("🔄 Running SeaORM auto-migrations...");
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let stmts = vec![
        schema
            .create_table_from_entity(users::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(client_memberships::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(assets::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(provider_credentials::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(access_capabilities::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(thumbnail_cache::Entity)
            .if_not_exists()
            .to_owned(),
        schema
            .create_table_from_entity(audit_logs::Entity)
            .if_not_exists()
            .to_owned(),
    ];

    for stmt in stmts {
        db.execute(builder.build(&stmt)).await?;
    }

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_access_capabilities_expires_at \
         ON access_capabilities(expires_at);",
        // Not unique: tombstoned imports keep their Drive file id.
        "CREATE INDEX IF NOT EXISTS idx_assets_provider_file_id ON assets(provider_file_id);",
    ];
    for sql in indexes {
        db.execute(sea_orm::Statement::from_string(builder, sql.to_string()))
            .await?;
    }

    Ok(())
}

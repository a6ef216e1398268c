use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::info;

pub mod entity;

const LOG_TARGET: &str = "crash_round::db";

pub async fn connect(database_url: &str) -> Result<DatabaseConnection> {
    let mut opts = ConnectOptions::new(database_url.to_owned());
    opts.max_connections(5)
        .min_connections(1)
        .sqlx_logging(false);
    Database::connect(opts)
        .await
        .with_context(|| format!("failed to connect to database at {database_url}"))
}

/// Creates the `rounds` and `bets` tables and their indexes when missing.
pub async fn ensure_schema(conn: &DatabaseConnection) -> Result<()> {
    create_table(conn, entity::rounds::Entity).await?;
    create_table(conn, entity::bets::Entity).await?;
    info!(target: LOG_TARGET, "database schema ready");
    Ok(())
}

async fn create_table<E>(conn: &DatabaseConnection, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    conn.execute(backend.build(&table))
        .await
        .with_context(|| format!("failed to create table {}", entity.table_name()))?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        conn.execute(backend.build(&index))
            .await
            .with_context(|| format!("failed to create index on {}", entity.table_name()))?;
    }
    Ok(())
}

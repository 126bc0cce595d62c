//! PostgreSQL backends for the regsweep crawler.
//!
//! [`PgEntityStore`] and [`PgCheckpointStore`] implement the crawler's
//! storage traits on a shared [`PgPool`]. Call [`migrate`] once before use.

mod checkpoint;
mod entities;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

pub use checkpoint::PgCheckpointStore;
pub use entities::PgEntityStore;

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;
    log::info!("Database connected");
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;
    log::info!("Migrations complete");
    Ok(())
}

// quire_server/src/db/mod.rs
pub mod pg_store;
pub mod seed;

pub use pg_store::PgStore;

use crate::config::AppConfig;
use crate::errors::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Opens the pool and brings the schema up to date.
pub async fn connect(config: &AppConfig, database_url: &str) -> Result<PgPool> {
  let pool = PgPoolOptions::new()
    .max_connections(config.database_max_connections)
    .connect(database_url)
    .await?;
  tracing::info!("Successfully connected to the database.");

  sqlx::migrate!("./migrations").run(&pool).await?;
  tracing::info!("Database migrations applied.");
  Ok(pool)
}

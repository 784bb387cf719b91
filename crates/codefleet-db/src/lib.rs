//! Database layer for codefleet.
//!
//! Provides document store backends and the typed repository record store.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repo;

pub use error::{DbError, DbResult};
pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;
pub use repo::{REPOSITORY_COLLECTION, RepositoryRecords};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

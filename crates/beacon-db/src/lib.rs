//! Database layer for Beacon.
//!
//! Provides the read-side store trait used by the distribution hub, a
//! PostgreSQL implementation, and `LISTEN`-based change notification sources.

pub mod error;
pub mod listen;
pub mod store;

pub use error::{DbError, DbResult};
pub use listen::{NotificationSource, NotificationStream, PgNotificationSource};
pub use store::{BuildStore, PgBuildStore};

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

/// Run database migrations (tables read here plus the notify triggers).
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

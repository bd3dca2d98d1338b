//! Postgres store: connection pool, migrations, and health check.
//!
//! `Db` implements every store trait. Cross-process exclusion comes from
//! Postgres row locks on conditional `UPDATE`s, never from this process.

pub mod action;
pub mod datastore;
pub mod pack;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Round-trip a `SELECT 1`.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Map a unique-constraint violation to `Error::Conflict`, everything else
/// to the store error.
pub(crate) fn conflict_or_store(e: sqlx::Error, what: impl FnOnce() -> String) -> crate::error::Error {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            crate::error::Error::Conflict(what())
        }
        _ => e.into(),
    }
}

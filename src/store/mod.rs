//! Persistence Module
//!
//! The Store is the single durable source of truth for the pipeline: the
//! transaction pool, the batch state machine, and the append-only
//! `post_attempts` log all live behind one SQLite database (spec.md §3/§4.1).
//! Every other module reaches the database only through `Store` methods —
//! nothing outside this module issues SQL directly.

mod attempts;
mod batches;
mod convert;
mod transactions;

pub use attempts::NewAttempt;
pub use convert::{h256_from_hex, h256_to_hex, u256_from_sortable_hex, u256_to_sortable_hex};
pub use transactions::InsertOutcome;

use crate::errors::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if absent) the SQLite database at `db_path`, apply
    /// WAL mode and a busy timeout so concurrent readers don't trip over the
    /// writer, and run pending migrations.
    pub async fn connect(db_path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))
            .map_err(|e| StoreError::Database(sqlx::Error::Configuration(e.into())))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .pragma("journal_mode", "WAL")
            .pragma("synchronous", "NORMAL");

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(sqlx::Error::Migrate(Box::new(e))))?;

        Ok(Self { pool })
    }

    /// Build a Store around an already-open pool. Used by tests that set up
    /// an in-memory database themselves.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
pub(crate) async fn test_store() -> Store {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Store::from_pool(pool)
}

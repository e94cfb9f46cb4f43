//! Persistence layer.
//!
//! [`TurnStore`] defines the interface for the append-only conversation log.
//! The default implementation is [`SqliteStore`]. To swap to another
//! database, implement [`TurnStore`] for the new type and change the concrete
//! type in [`crate::state::AppState`].
//!
//! All trait methods use `impl Future` in their signatures so no extra
//! `async-trait` crate is required on this side.

pub mod dao;
pub mod turn;

pub use dao::{ConversationTurn, NewTurn, Role};
pub use turn::TurnStore;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g. `"sqlite://parley.db"`.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running pending migrations first.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database; every connection to
    /// `sqlite::memory:` is a separate database, so the pool is capped at one.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Close the pool; later queries fail with `PoolClosed`.
    #[cfg(test)]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

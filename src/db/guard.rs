//! Connection lifecycle guard.
//!
//! A [`ConnectionGuard`] owns one checked-out connection for the length of a
//! single facade call and gives it back exactly once, whatever the call's
//! outcome.
//!
//! # Usage
//!
//! ```ignore
//! let mut guard = pools.acquire(alias).await?;
//!
//! let result = executor.fetch_rows(guard.connection(), &statement, limit).await;
//!
//! // Explicit finish (preferred) or rely on Drop
//! guard.finish(&result).await;
//! result
//! ```
//!
//! # Drop Behavior
//!
//! If the guard is dropped without `finish` (a panic, or the caller's future
//! being cancelled), the connection goes back through sqlx' own drop path and
//! the checkout count is still decremented. A warning is logged since the
//! connection was not inspected first.

use crate::db::pool::{DbConnection, PoolEntry};
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use std::sync::Arc;
use tracing::{debug, warn};

/// Exclusive use of one pooled connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    conn: DbConnection,
    checkout: Checkout,
}

impl ConnectionGuard {
    /// Wrap a freshly acquired connection. The caller has already counted it.
    pub(crate) fn new(conn: DbConnection, entry: Arc<PoolEntry>) -> Self {
        Self {
            conn,
            checkout: Checkout {
                entry,
                finished: false,
            },
        }
    }

    /// Get the guarded connection.
    pub fn connection(&mut self) -> &mut DbConnection {
        &mut self.conn
    }

    /// Get the alias of the pool the connection came from.
    pub fn alias(&self) -> &str {
        self.checkout.entry.alias()
    }

    /// Get the database type of the guarded connection.
    pub fn db_type(&self) -> DatabaseType {
        self.conn.db_type()
    }

    /// Give the connection back after a call completed with `result`.
    ///
    /// When the call failed because the connection itself broke, the
    /// connection is closed rather than pooled. Failure to close is logged as
    /// [`DbError::ReleaseFailed`] and never replaces `result`.
    pub async fn finish<T>(self, result: &DbResult<T>) {
        let Self { conn, checkout } = self;
        let alias = checkout.entry.alias().to_string();

        let broken = matches!(result, Err(e) if e.is_connection_broken());
        if broken {
            debug!(alias = %alias, "Closing broken connection instead of returning it");
            if let Err(e) = conn.close().await {
                let err = DbError::release_failed(&alias, e);
                warn!(alias = %alias, error = %err, "Connection release failed");
            }
        } else {
            drop(conn);
        }

        checkout.complete();
        debug!(alias = %alias, "Connection released");
    }

    /// Give a healthy connection back.
    pub async fn release(self) {
        self.finish(&Ok::<(), DbError>(())).await;
    }
}

/// Checkout bookkeeping for one guard.
#[derive(Debug)]
struct Checkout {
    entry: Arc<PoolEntry>,
    finished: bool,
}

impl Checkout {
    fn complete(mut self) {
        self.finished = true;
        self.entry.decrement_checked_out();
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.entry.decrement_checked_out();
        warn!(
            alias = %self.entry.alias(),
            "Connection released via Drop - call finish() explicitly"
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::config::PoolOptions;
    use crate::db::pool::PoolManager;
    use crate::error::DbError;
    use crate::models::ConnectionConfig;

    async fn memory_pool() -> PoolManager {
        let manager = PoolManager::new();
        let config =
            ConnectionConfig::new("default", "sqlite::memory:", PoolOptions::default()).unwrap();
        manager.register(config).await.unwrap();
        manager
    }

    #[tokio::test]
    async fn test_finish_decrements_checkout_count() {
        let pools = memory_pool().await;

        let guard = pools.acquire(None).await.unwrap();
        assert_eq!(guard.alias(), "default");
        assert_eq!(pools.checked_out(None).await.unwrap(), 1);

        guard.finish(&Ok::<(), DbError>(())).await;
        assert_eq!(pools.checked_out(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_finish_after_failure_still_releases() {
        let pools = memory_pool().await;

        let guard = pools.acquire(None).await.unwrap();
        let failed: Result<(), DbError> = Err(DbError::invalid_input("bad"));
        guard.finish(&failed).await;
        assert_eq!(pools.checked_out(None).await.unwrap(), 0);

        // The single connection is usable again
        let guard = pools.acquire(None).await.unwrap();
        guard.release().await;
    }

    #[tokio::test]
    async fn test_drop_without_finish_releases() {
        let pools = memory_pool().await;

        {
            let _guard = pools.acquire(None).await.unwrap();
            assert_eq!(pools.checked_out(None).await.unwrap(), 1);
        }
        assert_eq!(pools.checked_out(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broken_connection_is_closed() {
        let pools = memory_pool().await;

        let guard = pools.acquire(None).await.unwrap();
        let broken: Result<(), DbError> = Err(DbError::execution_failed(sqlx::Error::Io(
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe"),
        )));
        guard.finish(&broken).await;
        assert_eq!(pools.checked_out(None).await.unwrap(), 0);

        // The pool opens a replacement on demand
        let guard = pools.acquire(None).await.unwrap();
        guard.release().await;
    }
}

//! Write-locking transactions on a pooled connection
//!
//! sqlx 0.7 only opens deferred transactions, so `BEGIN IMMEDIATE` is issued
//! by hand. A connection whose transaction state is unknown after a failed
//! rollback is detached from the pool instead of going back into it.

use super::DbPool;
use sqlx::pool::PoolConnection;
use sqlx::Sqlite;
use tracing::warn;

pub(crate) type LockedConnection = PoolConnection<Sqlite>;

/// Acquire a connection and take the store's write lock on it
pub(crate) async fn begin_immediate(pool: &DbPool) -> Result<LockedConnection, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(conn)
}

/// Commit, rolling back (or discarding the connection) if that fails
pub(crate) async fn commit(mut conn: LockedConnection, context: &str) -> Result<(), sqlx::Error> {
    if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
        rollback(conn, context).await;
        return Err(e);
    }
    Ok(())
}

/// Roll back. Returns `false` when the connection had to be discarded.
pub(crate) async fn rollback(mut conn: LockedConnection, context: &str) -> bool {
    match sqlx::query("ROLLBACK").execute(&mut *conn).await {
        Ok(_) => true,
        // SQLite already ended the transaction itself
        Err(e) if e.to_string().contains("no transaction is active") => true,
        Err(e) => {
            warn!("Rollback of {} failed, discarding connection: {}", context, e);
            drop(conn.detach());
            false
        }
    }
}

//! Migration Ledger
//!
//! Append-only record of which migration steps have run against this store.
//! Entries are written by the runner inside the same transaction as the step
//! they describe and are never updated or deleted.

use super::MigrationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite};
use tracing::debug;

/// Ledger table name
pub const LEDGER_TABLE: &str = "schema_migrations";

/// One applied migration step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub sequence: i64,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

/// Create the ledger table if it is missing
pub async fn ensure_ledger<'e, E>(executor: E) -> Result<(), MigrationError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            sequence INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(executor)
    .await
    .map_err(MigrationError::LedgerUnavailable)?;

    Ok(())
}

/// True iff a ledger entry exists for `sequence`
pub async fn has_applied<'e, E>(executor: E, sequence: i64) -> Result<bool, MigrationError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations WHERE sequence = ?1")
            .bind(sequence)
            .fetch_one(executor)
            .await
            .map_err(MigrationError::LedgerUnavailable)?;

    Ok(count > 0)
}

/// Append one entry.
///
/// # Errors
/// `DuplicateApplication` if `sequence` is already recorded. The runner
/// checks `has_applied` under the write lock first, so this signals a bug.
pub async fn record_applied<'e, E>(
    executor: E,
    sequence: i64,
    description: &str,
    applied_at: DateTime<Utc>,
) -> Result<(), MigrationError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO schema_migrations (sequence, description, applied_at) VALUES (?1, ?2, ?3)",
    )
    .bind(sequence)
    .bind(description.to_string())
    .bind(applied_at)
    .execute(executor)
    .await
    .map_err(|e| match e.as_database_error() {
        Some(db_error) if db_error.is_unique_violation() => {
            MigrationError::DuplicateApplication { sequence }
        }
        _ => MigrationError::LedgerUnavailable(e),
    })?;

    debug!("Recorded migration {} ({}) in ledger", sequence, description);
    Ok(())
}

/// All entries, lowest sequence first
pub async fn applied_entries<'e, E>(executor: E) -> Result<Vec<LedgerEntry>, MigrationError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, LedgerEntry>(
        "SELECT sequence, description, applied_at FROM schema_migrations ORDER BY sequence",
    )
    .fetch_all(executor)
    .await
    .map_err(MigrationError::LedgerUnavailable)
}

//! Schema migrations
//!
//! Ordered, ledger-tracked schema changes. Each step runs in its own
//! `BEGIN IMMEDIATE` transaction together with its ledger entry, so a step
//! and its record commit or roll back as one unit. Steps are not globally
//! transactional: a failure leaves earlier steps applied.

pub mod ledger;
pub mod steps;

pub use ledger::LedgerEntry;
pub use steps::TRADE_JOURNAL_MIGRATIONS;

use super::{transaction, DbPool};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, error, info};

/// Migration failure
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The ledger could not be created, read, locked or written.
    /// Startup must not continue.
    #[error("Migration ledger unavailable: {0}")]
    LedgerUnavailable(#[source] sqlx::Error),

    /// A step's change failed and was rolled back. Earlier steps stand.
    #[error("Migration {sequence} ({description}) failed: {source}")]
    MigrationApply {
        sequence: i64,
        description: String,
        #[source]
        source: sqlx::Error,
    },

    /// The ledger already holds this sequence
    #[error("Migration {sequence} is already recorded in the ledger")]
    DuplicateApplication { sequence: i64 },

    /// The supplied step list is not a total order
    #[error("Migration sequence {sequence} appears more than once")]
    DuplicateSequence { sequence: i64 },
}

/// One forward schema change.
///
/// Both variants tolerate a store where the change already exists, which
/// covers schema edits made outside the runner.
#[derive(Debug, Clone, Copy)]
pub enum SchemaChange {
    /// Statement written with `IF NOT EXISTS` or equivalent
    Statement(&'static str),
    /// `ALTER TABLE .. ADD COLUMN`, skipped when the column is present
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
}

impl SchemaChange {
    async fn apply(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        match self {
            SchemaChange::Statement(sql) => {
                sqlx::query(sql).execute(&mut *conn).await?;
            }
            SchemaChange::AddColumn {
                table,
                column,
                definition,
            } => {
                let existing: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
                )
                .bind(*table)
                .bind(*column)
                .fetch_one(&mut *conn)
                .await?;

                if existing > 0 {
                    debug!("Column {}.{} already present, skipping", table, column);
                    return Ok(());
                }

                let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition);
                sqlx::query(&sql).execute(&mut *conn).await?;
            }
        }
        Ok(())
    }
}

/// An ordered, named schema change. Never edited once applied.
#[derive(Debug, Clone, Copy)]
pub struct MigrationStep {
    pub sequence: i64,
    pub description: &'static str,
    pub changes: &'static [SchemaChange],
}

/// Outcome of one runner pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Sequences applied by this run, in application order
    pub applied: Vec<i64>,
    /// Sequences that were already in the ledger
    pub skipped: Vec<i64>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Snapshot of the store's schema against a step list
#[derive(Debug, Clone, Serialize)]
pub struct SchemaStatus {
    pub trades_table_exists: bool,
    pub total_tables: i64,
    pub trades_columns: Vec<String>,
    pub applied: Vec<LedgerEntry>,
    pub pending: Vec<i64>,
    pub schema_ready: bool,
}

/// Applies migration steps against one store
pub struct MigrationRunner {
    pool: DbPool,
}

impl MigrationRunner {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Apply every step of `steps` not yet in the ledger, lowest sequence first.
    ///
    /// Safe to call on every deployment; already-applied steps are skipped.
    ///
    /// # Errors
    /// - `DuplicateSequence` if `steps` repeats a sequence (nothing is applied)
    /// - `LedgerUnavailable` if the ledger cannot be bootstrapped or read
    /// - `MigrationApply` on the first failing step; later steps are not tried
    pub async fn run(&self, steps: &[MigrationStep]) -> Result<MigrationReport, MigrationError> {
        let ordered = order_steps(steps)?;

        info!("Running database migrations ({} steps known)...", ordered.len());
        ledger::ensure_ledger(&self.pool).await.map_err(|e| {
            error!("Cannot initialize migration ledger: {}", e);
            e
        })?;

        let mut report = MigrationReport::default();
        for step in ordered {
            if self.apply_step(step).await? {
                report.applied.push(step.sequence);
            } else {
                report.skipped.push(step.sequence);
            }
        }

        if report.is_noop() {
            info!("✓ Schema up to date ({} steps already applied)", report.skipped.len());
        } else {
            info!(
                "✓ Database migrations completed: applied {:?}, skipped {:?}",
                report.applied, report.skipped
            );
        }

        Ok(report)
    }

    /// Compare the store against `steps` without changing anything
    pub async fn status(&self, steps: &[MigrationStep]) -> Result<SchemaStatus, MigrationError> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(MigrationError::LedgerUnavailable)?;

        let trades_table_exists = tables.iter().any(|name| name == "trades");
        let trades_columns: Vec<String> = if trades_table_exists {
            sqlx::query_scalar("SELECT name FROM pragma_table_info('trades') ORDER BY cid")
                .fetch_all(&self.pool)
                .await
                .map_err(MigrationError::LedgerUnavailable)?
        } else {
            Vec::new()
        };

        let applied = if tables.iter().any(|name| name == ledger::LEDGER_TABLE) {
            ledger::applied_entries(&self.pool).await?
        } else {
            Vec::new()
        };

        let applied_sequences: HashSet<i64> = applied.iter().map(|entry| entry.sequence).collect();
        let pending: Vec<i64> = order_steps(steps)?
            .into_iter()
            .map(|step| step.sequence)
            .filter(|sequence| !applied_sequences.contains(sequence))
            .collect();

        Ok(SchemaStatus {
            trades_table_exists,
            total_tables: tables.len() as i64,
            trades_columns,
            schema_ready: trades_table_exists && pending.is_empty(),
            applied,
            pending,
        })
    }

    /// Returns `false` when the step turned out to be applied already
    async fn apply_step(&self, step: &MigrationStep) -> Result<bool, MigrationError> {
        if ledger::has_applied(&self.pool, step.sequence).await? {
            debug!("Migration {} ({}) already applied", step.sequence, step.description);
            return Ok(false);
        }

        // Takes the write lock up front: a concurrent runner waits here and
        // then sees the ledger entry written by whoever got in first.
        let mut conn = transaction::begin_immediate(&self.pool)
            .await
            .map_err(MigrationError::LedgerUnavailable)?;
        let context = format!("migration {}", step.sequence);

        match Self::apply_locked(&mut conn, step).await {
            Ok(applied) => {
                transaction::commit(conn, &context).await.map_err(|source| {
                    error!("Commit of migration {} failed: {}", step.sequence, source);
                    MigrationError::MigrationApply {
                        sequence: step.sequence,
                        description: step.description.to_string(),
                        source,
                    }
                })?;
                if applied {
                    info!("✓ Applied migration {} ({})", step.sequence, step.description);
                }
                Ok(applied)
            }
            Err(e) => {
                error!("Migration {} ({}) rolled back: {}", step.sequence, step.description, e);
                transaction::rollback(conn, &context).await;
                Err(e)
            }
        }
    }

    async fn apply_locked(
        conn: &mut SqliteConnection,
        step: &MigrationStep,
    ) -> Result<bool, MigrationError> {
        if ledger::has_applied(&mut *conn, step.sequence).await? {
            debug!(
                "Migration {} ({}) applied by another runner",
                step.sequence, step.description
            );
            return Ok(false);
        }

        info!("Applying migration {} ({})", step.sequence, step.description);
        for change in step.changes {
            change
                .apply(conn)
                .await
                .map_err(|source| MigrationError::MigrationApply {
                    sequence: step.sequence,
                    description: step.description.to_string(),
                    source,
                })?;
        }

        ledger::record_applied(&mut *conn, step.sequence, step.description, Utc::now()).await?;
        Ok(true)
    }
}

/// Sort ascending by sequence, rejecting repeats
fn order_steps(steps: &[MigrationStep]) -> Result<Vec<&MigrationStep>, MigrationError> {
    let mut ordered: Vec<&MigrationStep> = steps.iter().collect();
    ordered.sort_by_key(|step| step.sequence);

    if let Some(pair) = ordered.windows(2).find(|pair| pair[0].sequence == pair[1].sequence) {
        return Err(MigrationError::DuplicateSequence {
            sequence: pair[0].sequence,
        });
    }

    Ok(ordered)
}

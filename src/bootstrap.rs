//! Startup sequence: connect, migrate, report.

use crate::config::AppConfig;
use crate::persistence::migrations::{
    MigrationReport, MigrationRunner, SchemaStatus, TRADE_JOURNAL_MIGRATIONS,
};
use crate::persistence::{connect, DatabaseError, DbPool};
use tracing::{info, warn};

/// A connected store, ready for use
pub struct Bootstrapped {
    pub pool: DbPool,
    /// Present when migrations ran as part of startup
    pub report: Option<MigrationReport>,
    pub status: SchemaStatus,
}

/// Connect to the configured store and, if enabled, bring its schema up to
/// date before anything else touches it.
///
/// # Errors
/// Fails when the store stays unreachable after the configured retries or
/// when a migration step fails. Either way startup must not continue.
pub async fn bootstrap(config: &AppConfig) -> Result<Bootstrapped, DatabaseError> {
    info!("Starting trade journal ({} environment)", config.environment);

    let pool = connect(&config.database).await?;
    let runner = MigrationRunner::new(pool.clone());

    let report = if config.run_migrations_on_startup {
        Some(runner.run(TRADE_JOURNAL_MIGRATIONS).await?)
    } else {
        info!("Startup migrations disabled (RUN_MIGRATIONS_ON_STARTUP=false)");
        None
    };

    let status = runner.status(TRADE_JOURNAL_MIGRATIONS).await?;
    if status.schema_ready {
        info!(
            "✓ Schema ready: {} tables, {} trade columns",
            status.total_tables,
            status.trades_columns.len()
        );
    } else {
        warn!(
            "Schema not ready: pending migrations {:?}. Run `trade-journal migrate`.",
            status.pending
        );
    }

    Ok(Bootstrapped {
        pool,
        report,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::DatabaseConfig;

    fn memory_config(run_migrations: bool) -> AppConfig {
        AppConfig {
            run_migrations_on_startup: run_migrations,
            database: DatabaseConfig::in_memory(),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bootstrap_runs_migrations() {
        let ready = bootstrap(&memory_config(true)).await.unwrap();

        let report = ready.report.unwrap();
        assert_eq!(report.applied, vec![1, 2, 3, 4, 5, 6]);
        assert!(ready.status.schema_ready);
    }

    #[tokio::test]
    async fn test_bootstrap_without_migrations_leaves_schema_alone() {
        let ready = bootstrap(&memory_config(false)).await.unwrap();

        assert!(ready.report.is_none());
        assert!(!ready.status.schema_ready);
        assert!(!ready.status.trades_table_exists);
        assert_eq!(ready.status.total_tables, 0);
    }
}

//! Persistence Layer
//!
//! SQLite storage for the trade journal with async access via sqlx.
//!
//! # Features
//! - Trade records guarded by store CHECK constraints
//! - Ordered, ledger-tracked schema migrations
//! - `updated_at` maintained by row triggers on every write path, strictly
//!   increasing per row and never before `created_at`
//! - `id` and `created_at` immutable once written
//! - Connection establishment with bounded retry
//!
//! # Database Schema
//!
//! ## Trades Table
//! - id: INTEGER, autoincrement, never reused
//! - symbol: trimmed and upper-cased on the way in
//! - side / quantity / entry_price / entry_time
//! - exit_price / exit_time: null until the position is closed
//! - fees: >= 0, default 0
//! - stop_loss / take_profit: optional risk targets
//! - lot_size: > 0, default 1
//! - checklist_grade / checklist_score / exit_reason
//! - pnl: derived from prices, size and fees unless the caller sets it
//! - notes
//! - created_at / updated_at
//!
//! ## Schema Migrations Table
//! - sequence: INTEGER primary key
//! - description: step name
//! - applied_at: Timestamp

pub mod migrations;
pub mod models;
pub mod repository;
pub(crate) mod transaction;

use crate::retry::{retry_with_backoff, RetryPolicy};
use migrations::{MigrationError, MigrationRunner, TRADE_JOURNAL_MIGRATIONS};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Storage error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    MigrationError(#[from] MigrationError),
}

impl DatabaseError {
    /// Classify a failed statement, keeping constraint violations distinct so
    /// callers can report them as invalid input.
    pub(crate) fn from_query(context: &str, error: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        if let Some(db_error) = error.as_database_error() {
            match db_error.kind() {
                ErrorKind::CheckViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation => {
                    return DatabaseError::ConstraintViolation(format!(
                        "{}: {}",
                        context,
                        db_error.message()
                    ));
                }
                // RAISE(ABORT) from a guard trigger and any other SQLITE_CONSTRAINT family code
                _ if is_sqlite_constraint_code(db_error.code().as_deref()) => {
                    return DatabaseError::ConstraintViolation(format!(
                        "{}: {}",
                        context,
                        db_error.message()
                    ));
                }
                _ => {}
            }
        }

        DatabaseError::QueryError(format!("{}: {}", context, error))
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, DatabaseError::ConstraintViolation(_))
    }
}

/// SQLITE_CONSTRAINT (19) and its extended codes share the low byte
fn is_sqlite_constraint_code(code: Option<&str>) -> bool {
    code.and_then(|code| code.parse::<i32>().ok())
        .map(|code| code & 0xff == 19)
        .unwrap_or(false)
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/trade_journal.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,

    /// Connection attempts before giving up
    pub connect_retries: u32,

    /// Delay before the first reconnection attempt (doubles afterwards)
    pub retry_delay: Duration,

    /// How long a writer waits on a locked store
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/trade_journal.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
            connect_retries: 5,
            retry_delay: Duration::from_millis(2000),
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

impl DatabaseConfig {
    /// Private in-memory store, mostly for tests and tooling
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            connect_retries: 1,
            retry_delay: Duration::from_millis(10),
            ..Self::default()
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build from a key lookup (normally the process environment).
    ///
    /// Unparseable or out-of-range values keep their default and are noted
    /// in `warnings`.
    pub fn from_lookup<F>(lookup: &F, warnings: &mut Vec<String>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            if url.trim().is_empty() {
                warnings.push("DATABASE_URL is empty, using default".to_string());
            } else {
                config.url = url.trim().to_string();
            }
        }

        if let Some(raw) = lookup("DATABASE_MAX_CONNECTIONS") {
            match raw.trim().parse::<u32>() {
                Ok(value) if (1..=100).contains(&value) => config.max_connections = value,
                _ => warnings.push(format!(
                    "Invalid DATABASE_MAX_CONNECTIONS '{}' (must be 1-100), using default: {}",
                    raw, config.max_connections
                )),
            }
        }

        if let Some(raw) = lookup("DATABASE_LOG_QUERIES") {
            config.log_queries = raw.to_lowercase() == "true" || raw == "1";
        }

        if let Some(raw) = lookup("DATABASE_CONNECT_RETRIES") {
            match raw.trim().parse::<u32>() {
                Ok(value) if (1..=20).contains(&value) => config.connect_retries = value,
                _ => warnings.push(format!(
                    "Invalid DATABASE_CONNECT_RETRIES '{}' (must be 1-20), using default: {}",
                    raw, config.connect_retries
                )),
            }
        }

        if let Some(raw) = lookup("DATABASE_RETRY_DELAY_MS") {
            match raw.trim().parse::<u64>() {
                Ok(value) if value <= 60_000 => config.retry_delay = Duration::from_millis(value),
                _ => warnings.push(format!(
                    "Invalid DATABASE_RETRY_DELAY_MS '{}' (must be <= 60000), using default: {:?}",
                    raw, config.retry_delay
                )),
            }
        }

        if let Some(raw) = lookup("DATABASE_BUSY_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(value) if value <= 300_000 => config.busy_timeout = Duration::from_millis(value),
                _ => warnings.push(format!(
                    "Invalid DATABASE_BUSY_TIMEOUT_MS '{}' (must be <= 300000), using default: {:?}",
                    raw, config.busy_timeout
                )),
            }
        }

        config
    }

    /// In-memory stores live only as long as their connections
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connect_retries,
            initial_delay: self.retry_delay,
            max_delay: self.retry_delay * 8,
        }
    }
}

/// Open the connection pool, retrying while the store is unreachable.
///
/// Does not touch the schema; see [`init_database`] or
/// [`crate::bootstrap::bootstrap`] for that.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Connecting to database: {}", config.url);

    // Ensure data directory exists
    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .busy_timeout(config.busy_timeout);
    let options = if config.log_queries {
        options.log_statements(tracing::log::LevelFilter::Debug)
    } else {
        options.disable_statement_logging()
    };

    let in_memory = config.is_in_memory();
    let max_connections = if in_memory { 1 } else { config.max_connections };

    let pool = retry_with_backoff("database connection", &config.retry_policy(), || {
        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if in_memory {
            // Closing the last connection would drop the whole store
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        pool_options.connect_with(options.clone())
    })
    .await?;

    info!(
        "✓ Database pool ready ({} max connection{})",
        max_connections,
        if max_connections == 1 { "" } else { "s" }
    );

    Ok(pool)
}

/// Connect and bring the schema up to date in one call
///
/// # Arguments
/// - `database_url`: SQLite URL (e.g., "sqlite://data/trade_journal.db" or "sqlite::memory:")
///
/// # Errors
/// Returns error if the store is unreachable or a migration step fails
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    let mut config = DatabaseConfig::with_url(database_url);
    if config.is_in_memory() {
        config = DatabaseConfig::in_memory();
    }

    let pool = connect(&config).await?;
    MigrationRunner::new(pool.clone())
        .run(TRADE_JOURNAL_MIGRATIONS)
        .await?;

    info!("✓ Database initialized successfully");
    Ok(pool)
}

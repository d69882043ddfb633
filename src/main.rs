use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trade_journal::bootstrap::bootstrap;
use trade_journal::config::{load_env_file, AppConfig};
use trade_journal::domain::entities::trade::TradeSide;
use trade_journal::persistence::connect;
use trade_journal::persistence::migrations::{MigrationRunner, TRADE_JOURNAL_MIGRATIONS};
use trade_journal::persistence::models::TradeFilter;
use trade_journal::persistence::repository::{SqliteTradeStore, TradeStore};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Trade journal store: schema management and startup checks.
#[derive(Debug, Parser)]
#[command(name = "trade-journal", version, about)]
struct Cli {
    /// Load environment variables from this file instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect, apply startup migrations and stay up until Ctrl+C.
    Start,
    /// Apply every pending migration and print the report as JSON.
    Migrate,
    /// Print the schema status as JSON without changing anything.
    Status,
    /// Print journaled trades as JSON, newest entry first.
    List {
        #[arg(long)]
        symbol: Option<String>,
        /// buy or sell
        #[arg(long)]
        side: Option<TradeSide>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let env_file = load_env_file(cli.env_file.as_deref());
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.filter_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match env_file {
        Ok(Some(path)) => info!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    }

    for warning in &config.warnings {
        warn!("{}", warning);
    }

    let result = match cli.command.unwrap_or(Command::Start) {
        Command::Start => start(&config).await,
        Command::Migrate => migrate(&config).await,
        Command::Status => status(&config).await,
        Command::List {
            symbol,
            side,
            limit,
            offset,
        } => {
            let filter = TradeFilter {
                symbol,
                side,
                limit,
                offset,
                ..TradeFilter::default()
            };
            list(&config, &filter).await
        }
    };

    if let Err(e) = &result {
        error!("✗ {}", e);
    }
    result
}

async fn start(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let ready = bootstrap(config).await?;

    info!("Trade journal ready. Press Ctrl+C to stop.");
    shutdown_signal().await;

    info!("Shutting down gracefully...");
    ready.pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn migrate(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect(&config.database).await?;
    let report = MigrationRunner::new(pool.clone())
        .run(TRADE_JOURNAL_MIGRATIONS)
        .await;
    pool.close().await;

    println!("{}", serde_json::to_string_pretty(&report?)?);
    Ok(())
}

async fn status(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect(&config.database).await?;
    let status = MigrationRunner::new(pool.clone())
        .status(TRADE_JOURNAL_MIGRATIONS)
        .await;
    pool.close().await;

    println!("{}", serde_json::to_string_pretty(&status?)?);
    Ok(())
}

async fn list(config: &AppConfig, filter: &TradeFilter) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect(&config.database).await?;
    let store = SqliteTradeStore::new(pool.clone());
    let trades = store.list(filter).await;
    pool.close().await;

    let trades = trades?;
    info!("Listing {} trade(s)", trades.len());
    println!("{}", serde_json::to_string_pretty(&trades)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

//! Application configuration
//!
//! Built once at startup from the environment (optionally seeded from a
//! `.env` file) and passed down by reference. Nothing below `main` reads
//! environment variables directly.

use crate::persistence::DatabaseConfig;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Configuration loading failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" | "testing" => Ok(Environment::Test),
            other => Err(format!("Unknown environment '{}'", other)),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    /// tracing level name used when `RUST_LOG` is unset
    pub log_level: String,
    pub run_migrations_on_startup: bool,
    pub database: DatabaseConfig,
    /// Problems found while parsing, reported once logging is up
    pub warnings: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            log_level: "info".to_string(),
            run_migrations_on_startup: true,
            database: DatabaseConfig::default(),
            warnings: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppConfig {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Invalid values keep their default and add an entry to `warnings`.
    pub fn from_lookup<F>(lookup: F) -> AppConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();
        let mut warnings = Vec::new();

        if let Some(env) = lookup("APP_ENV") {
            match env.parse::<Environment>() {
                Ok(environment) => config.environment = environment,
                Err(e) => warnings.push(format!(
                    "Invalid APP_ENV: {}, using default: {}",
                    e, config.environment
                )),
            }
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            match normalize_log_level(&level) {
                Some(normalized) => config.log_level = normalized.to_string(),
                None => warnings.push(format!(
                    "Invalid LOG_LEVEL '{}', using default: {}",
                    level, config.log_level
                )),
            }
        }

        if let Some(enabled) = lookup("RUN_MIGRATIONS_ON_STARTUP") {
            config.run_migrations_on_startup = enabled.to_lowercase() == "true" || enabled == "1";
        }

        config.database = DatabaseConfig::from_lookup(&lookup, &mut warnings);
        config.warnings = warnings;
        config
    }

    /// Default `EnvFilter` directive when `RUST_LOG` is not set
    pub fn filter_directive(&self) -> String {
        format!("trade_journal={}", self.log_level)
    }
}

/// Accepts tracing level names plus the `warning`/`critical` aliases
fn normalize_log_level(level: &str) -> Option<&'static str> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "critical" => Some("error"),
        _ => None,
    }
}

/// Seed the process environment from a `.env` file.
///
/// With an explicit path the file must be readable. Without one a `.env` in
/// the working directory is used when present. Variables already set in the
/// environment win. Returns the file that was loaded, if any.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    match path {
        Some(path) => dotenvy::from_path(path)
            .map(|_| Some(path.to_path_buf()))
            .map_err(|source| ConfigError::EnvFile {
                path: path.to_path_buf(),
                source,
            }),
        None => Ok(dotenvy::dotenv().ok()),
    }
}

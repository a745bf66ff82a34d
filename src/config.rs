//! Application configuration loading from config.toml and the environment.
//!
//! `DATABASE_URL` always wins over the config file so a deployment can point
//! at a different database without editing the file. The `[[envelope]]`
//! tables seed the envelope registry on first run; seeding skips names that
//! already exist.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/envelope_ledger.sqlite?mode=rwc";
const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 4000;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    /// Database connection string; overridden by the `DATABASE_URL`
    /// environment variable
    pub database_url: Option<String>,
    /// How long a store write may take before it is retained as pending,
    /// in milliseconds
    pub confirm_timeout_ms: Option<u64>,
    /// Envelopes to seed on first run
    #[serde(default, rename = "envelope")]
    pub envelopes: Vec<EnvelopeSeed>,
}

/// One `[[envelope]]` table from config.toml
#[derive(Debug, Deserialize, Clone)]
pub struct EnvelopeSeed {
    /// Name of the envelope
    pub name: String,
    /// Category for organization (e.g., "necessary", `quality_of_life`)
    #[serde(default)]
    pub category: Option<String>,
    /// Display position
    #[serde(default)]
    pub order_index: i32,
    /// Monthly piggybank contribution in dollars; presence makes the
    /// envelope a piggybank
    #[serde(default)]
    pub monthly_contribution: Option<f64>,
    /// Piggybank savings target in dollars
    #[serde(default)]
    pub target_amount: Option<f64>,
}

impl AppConfig {
    /// The effective database URL: environment first, then config file,
    /// then the default local `SQLite` path.
    #[must_use]
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            self.database_url
                .clone()
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
        })
    }

    /// The confirm window for store writes.
    #[must_use]
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms.unwrap_or(DEFAULT_CONFIRM_TIMEOUT_MS))
    }
}

/// Loads configuration from a TOML file.
///
/// # Errors
/// Returns [`Error::Config`] when the file cannot be read or parsed.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads configuration from the default location (./config.toml), falling
/// back to built-in defaults when the file does not exist.
///
/// # Errors
/// Returns [`Error::Config`] when the file exists but cannot be parsed.
pub fn load_default_config() -> Result<AppConfig> {
    let path = Path::new("config.toml");
    if path.exists() {
        load_config(path)
    } else {
        Ok(AppConfig::default())
    }
}

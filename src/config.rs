// ⚙️ Service configuration
// Read from CAMPUS_* environment variables, with defaults for local use.

use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use std::env;
use std::path::PathBuf;

use crate::replenishment::ReplenishmentPolicy;

/// Minimum accepted length of the bearer-token signing secret
pub const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file shared by every service instance
    pub database_path: PathBuf,

    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// HMAC secret for bearer tokens (required by the server)
    pub token_secret: Option<String>,

    /// Coins granted on every replenishment
    pub coin_allowance: i64,

    /// Calendar offset used for the component-wise replenishment comparison
    pub utc_offset_hours: i32,

    /// How many days a card stays in the public listing
    pub card_window_days: i64,

    /// tracing filter directive
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("campus-match.db"),
            bind_addr: "0.0.0.0:3000".to_string(),
            token_secret: None,
            coin_allowance: 2,
            utc_offset_hours: 9,
            card_window_days: 7,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("CAMPUS_DB_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(addr) = lookup("CAMPUS_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Some(secret) = lookup("CAMPUS_TOKEN_SECRET") {
            if secret.len() < MIN_SECRET_LEN {
                return Err(anyhow!(
                    "CAMPUS_TOKEN_SECRET must be at least {} bytes",
                    MIN_SECRET_LEN
                ));
            }
            config.token_secret = Some(secret);
        }

        if let Some(allowance) = lookup("CAMPUS_COIN_ALLOWANCE") {
            config.coin_allowance = allowance
                .parse()
                .context("Invalid CAMPUS_COIN_ALLOWANCE value")?;
            if config.coin_allowance < 0 {
                return Err(anyhow!("CAMPUS_COIN_ALLOWANCE must not be negative"));
            }
        }

        if let Some(offset) = lookup("CAMPUS_UTC_OFFSET_HOURS") {
            config.utc_offset_hours = offset
                .parse()
                .context("Invalid CAMPUS_UTC_OFFSET_HOURS value")?;
            if !(-23..=23).contains(&config.utc_offset_hours) {
                return Err(anyhow!("CAMPUS_UTC_OFFSET_HOURS must be within -23..=23"));
            }
        }

        if let Some(days) = lookup("CAMPUS_CARD_WINDOW_DAYS") {
            config.card_window_days = days
                .parse()
                .context("Invalid CAMPUS_CARD_WINDOW_DAYS value")?;
        }

        if let Some(filter) = lookup("RUST_LOG") {
            config.log_filter = filter;
        }

        Ok(config)
    }

    /// Calendar used by the replenishment comparison
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .ok_or_else(|| anyhow!("Invalid UTC offset: {} hours", self.utc_offset_hours))
    }

    pub fn replenishment_policy(&self) -> Result<ReplenishmentPolicy> {
        Ok(ReplenishmentPolicy::new(self.coin_allowance, self.utc_offset()?))
    }

    pub fn require_token_secret(&self) -> Result<&str> {
        self.token_secret
            .as_deref()
            .context("CAMPUS_TOKEN_SECRET environment variable is required")
    }
}

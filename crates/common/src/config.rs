use anyhow::{Context, Result};
use serde::Deserialize;
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: General,
    pub database: Database,
    pub server: Server,
    #[serde(default)]
    pub realtime: Realtime,
    #[serde(default)]
    pub leaderboard: Leaderboard,
    pub observability: Observability,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
    /// Bearer token for service-to-service calls. Unset = dev mode, no auth.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Realtime {
    /// Buffer size of the change-feed broadcast channel.
    pub feed_capacity: usize,
    /// Queue fill percentage [0, 100] at which a backpressure warning is emitted.
    pub warn_threshold_pct: u8,
}

impl Default for Realtime {
    fn default() -> Self {
        Self {
            feed_capacity: 1024,
            warn_threshold_pct: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Leaderboard {
    /// Minimum win+loss count before a bettor is ranked.
    pub min_bets: u32,
    /// IANA zone that defines "Monday 00:00" for the weekly window.
    pub timezone: String,
    pub refresh_interval_secs: u64,
}

impl Default for Leaderboard {
    fn default() -> Self {
        Self {
            min_bets: 5,
            timezone: "America/New_York".to_string(),
            refresh_interval_secs: 3600,
        }
    }
}

impl Leaderboard {
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("invalid leaderboard.timezone {:?}: {e}", self.timezone))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Observability {
    pub prometheus_port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            self.realtime.feed_capacity > 0,
            "realtime.feed_capacity must be > 0"
        );
        anyhow::ensure!(
            self.realtime.warn_threshold_pct <= 100,
            "realtime.warn_threshold_pct must be in [0, 100]"
        );
        anyhow::ensure!(
            self.leaderboard.refresh_interval_secs > 0,
            "leaderboard.refresh_interval_secs must be > 0"
        );
        self.leaderboard.tz()?;
        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}

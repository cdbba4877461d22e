use std::path::PathBuf;
use std::time::Duration;

use crate::placement::HttpPlacementConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database holding campaign rows
    pub database_url: String,
    /// Campaign definition (TOML)
    pub campaign_file: PathBuf,
    /// Endpoint of the call placement service
    pub call_api_url: String,
    /// Bearer token for the call placement service
    pub call_api_key: Option<String>,
    /// Per-request timeout for call placement
    pub call_api_timeout: Duration,
    /// When set, reset rows from this index and relaunch instead of a plain start
    pub relaunch_from_line: Option<usize>,
    /// How often the database is re-read for rows updated by other processes
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let call_api_url = std::env::var("CALL_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("CALL_API_URL must be set"))?;

        Ok(Self {
            database_url: env_str("CAMPAIGN_DATABASE_URL", "sqlite:./data/campaigns.db"),
            campaign_file: PathBuf::from(env_str("CAMPAIGN_FILE", "campaign.toml")),
            call_api_url,
            call_api_key: std::env::var("CALL_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            call_api_timeout: Duration::from_secs(env_parse("CALL_API_TIMEOUT_SECS", 30)?),
            relaunch_from_line: env_parse_opt("RELAUNCH_FROM_LINE")?,
            poll_interval: Duration::from_secs(
                env_parse::<u64>("CAMPAIGN_POLL_INTERVAL_SECS", 5)?.max(1),
            ),
        })
    }

    pub fn placement(&self) -> HttpPlacementConfig {
        HttpPlacementConfig {
            url: self.call_api_url.clone(),
            api_key: self.call_api_key.clone(),
            timeout: self.call_api_timeout,
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    Ok(env_parse_opt(key)?.unwrap_or(default))
}

fn env_parse_opt<T: std::str::FromStr>(key: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(None),
    }
}

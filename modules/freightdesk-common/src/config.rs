use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FreightDeskError;

/// How scrape completion is detected after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// One re-fetch after a fixed delay.
    Fixed,
    /// Re-fetch at an interval until the freight list changes.
    Converge,
}

impl FromStr for CompletionMode {
    type Err = FreightDeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(CompletionMode::Fixed),
            "converge" => Ok(CompletionMode::Converge),
            other => Err(FreightDeskError::Config(format!(
                "SCRAPE_COMPLETION must be 'fixed' or 'converge', got '{other}'"
            ))),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Backend
    pub api_base_url: String,
    pub http_timeout: Duration,

    // Scraping
    pub headless: bool,
    pub refresh_delay: Duration,
    pub completion_mode: CompletionMode,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,

    // Freight list
    pub freight_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            http_timeout: Duration::from_secs(30),
            headless: false,
            refresh_delay: Duration::from_secs(10),
            completion_mode: CompletionMode::Fixed,
            poll_interval: Duration::from_secs(2),
            poll_max_attempts: 15,
            freight_page_size: 100,
        }
    }
}

impl Config {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, FreightDeskError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Unset keys fall
    /// back to defaults; malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FreightDeskError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            api_base_url: var("FREIGHTDESK_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            http_timeout: match var("FREIGHTDESK_HTTP_TIMEOUT_SECS") {
                Some(v) => Duration::from_secs(parse("FREIGHTDESK_HTTP_TIMEOUT_SECS", &v)?),
                None => defaults.http_timeout,
            },
            headless: match var("SCRAPE_HEADLESS") {
                Some(v) => parse_bool("SCRAPE_HEADLESS", &v)?,
                None => defaults.headless,
            },
            refresh_delay: match var("SCRAPE_REFRESH_DELAY_SECS") {
                Some(v) => Duration::from_secs(parse("SCRAPE_REFRESH_DELAY_SECS", &v)?),
                None => defaults.refresh_delay,
            },
            completion_mode: match var("SCRAPE_COMPLETION") {
                Some(v) => v.parse()?,
                None => defaults.completion_mode,
            },
            poll_interval: match var("SCRAPE_POLL_INTERVAL_SECS") {
                Some(v) => Duration::from_secs(parse("SCRAPE_POLL_INTERVAL_SECS", &v)?),
                None => defaults.poll_interval,
            },
            poll_max_attempts: match var("SCRAPE_POLL_MAX_ATTEMPTS") {
                Some(v) => parse("SCRAPE_POLL_MAX_ATTEMPTS", &v)?,
                None => defaults.poll_max_attempts,
            },
            freight_page_size: match var("FREIGHT_PAGE_SIZE") {
                Some(v) => parse("FREIGHT_PAGE_SIZE", &v)?,
                None => defaults.freight_page_size,
            },
        })
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  FREIGHTDESK_API_URL: {}", self.api_base_url);
        tracing::info!("  HTTP timeout: {}s", self.http_timeout.as_secs());
        tracing::info!("  SCRAPE_HEADLESS: {}", self.headless);
        tracing::info!(
            "  Completion: {:?} (delay {}s, interval {}s, max {} polls)",
            self.completion_mode,
            self.refresh_delay.as_secs(),
            self.poll_interval.as_secs(),
            self.poll_max_attempts
        );
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, FreightDeskError> {
    value
        .trim()
        .parse()
        .map_err(|_| FreightDeskError::Config(format!("{key} must be a number, got '{value}'")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, FreightDeskError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(FreightDeskError::Config(format!(
            "{key} must be true or false, got '{value}'"
        ))),
    }
}

//! Timings and limits for extraction jobs, plus environment loading.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DATABASE_URL: &str = "sqlite://harvester.db?mode=rwc";
const DEFAULT_INGEST_URL: &str = "http://localhost:3000/api/analyze/";

/// Controller timings and safety limits.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    /// Pause before navigating to the next page. Keeps the source's
    /// anti-automation defences quiet.
    pub page_delay: Duration,

    /// Pause after a navigation completes before asking for a scrape.
    pub settle_delay: Duration,

    /// Records per submission chunk.
    pub batch_size: usize,

    /// Pause between submission chunks.
    pub batch_delay: Duration,

    /// Hard cap on the page number a job may reach.
    pub max_pages: u32,

    /// Consecutive non-progress signals that fail a job.
    pub stuck_threshold: u32,

    /// How long a finished job stays visible before removal.
    pub removal_grace: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(2500),
            settle_delay: Duration::from_millis(2000),
            batch_size: 20,
            batch_delay: Duration::from_millis(500),
            max_pages: 100,
            stuck_threshold: 3,
            removal_grace: Duration::from_secs(5),
        }
    }
}

impl HarvestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_stuck_threshold(mut self, threshold: u32) -> Self {
        self.stuck_threshold = threshold;
        self
    }

    pub fn with_removal_grace(mut self, grace: Duration) -> Self {
        self.removal_grace = grace;
        self
    }

    /// All delays set to zero. Handy for tests that don't care about pacing.
    pub fn immediate() -> Self {
        Self::default()
            .with_page_delay(Duration::ZERO)
            .with_settle_delay(Duration::ZERO)
            .with_batch_delay(Duration::ZERO)
            .with_removal_grace(Duration::ZERO)
    }

    /// Load overrides from the environment on top of the defaults.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = Self::default();
        Ok(Self {
            page_delay: env_millis("HARVEST_PAGE_DELAY_MS", defaults.page_delay)?,
            settle_delay: env_millis("HARVEST_SETTLE_DELAY_MS", defaults.settle_delay)?,
            batch_size: env_parse("HARVEST_BATCH_SIZE", defaults.batch_size)?,
            batch_delay: env_millis("HARVEST_BATCH_DELAY_MS", defaults.batch_delay)?,
            max_pages: env_parse("HARVEST_MAX_PAGES", defaults.max_pages)?,
            stuck_threshold: env_parse("HARVEST_STUCK_THRESHOLD", defaults.stuck_threshold)?,
            removal_grace: env_millis("HARVEST_REMOVAL_GRACE_MS", defaults.removal_grace)?,
        })
    }
}

/// Process-level configuration for the binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub ingest_url: String,
    pub harvest: HarvestConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let harvest = HarvestConfig::from_env()?;

        Ok(Self {
            database_url: env::var("HARVEST_DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            ingest_url: env::var("HARVEST_INGEST_URL")
                .unwrap_or_else(|_| DEFAULT_INGEST_URL.to_string()),
            harvest,
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number")),
        Err(_) => Ok(default),
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    env_parse(key, default_ms).map(Duration::from_millis)
}

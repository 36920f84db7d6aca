/// Configuration module for managing environment variables and API keys
///
/// Values are read from the process environment (typically from a .env file).
/// Credentials for the external APIs are optional: when one is missing the
/// endpoints that need it answer with a 400 instead of the server refusing
/// to start.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL database URL; when unset the in-memory store is used
    pub database_url: Option<String>,

    /// Port for the HTTP API
    pub port: u16,

    /// Twitter API v2 app-only bearer token
    pub twitter_bearer_token: Option<String>,

    pub twitter_api_base: String,

    /// Google Gemini API key
    pub gemini_api_key: Option<String>,

    /// Primary generation model (e.g., "gemini-2.5-pro")
    pub gemini_pro_model: String,

    /// Fallback / fast generation model (e.g., "gemini-2.5-flash")
    pub gemini_flash_model: String,

    pub gemini_api_base: String,

    pub ingest: IngestSettings,

    pub retention: RetentionSettings,
}

/// Knobs for the timeline polling pass
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Pause between two monitored users
    pub delay_between_users: Duration,

    /// Posts taken the first time a user is fetched
    pub bootstrap_batch: u32,

    /// Upper bound on posts taken after the cursor
    pub incremental_batch: u32,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            delay_between_users: Duration::from_millis(1000),
            bootstrap_batch: 2,
            incremental_batch: 100,
        }
    }
}

/// How long stale rows survive before the cleanup task drops them
#[derive(Debug, Clone)]
pub struct RetentionSettings {
    pub cleanup_interval: Duration,
    pub used_post_max_age: chrono::Duration,
    pub posted_record_max_age: chrono::Duration,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(3600),
            used_post_max_age: chrono::Duration::hours(24),
            posted_record_max_age: chrono::Duration::days(7),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable is set but cannot be parsed
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let ingest_defaults = IngestSettings::default();
        let retention_defaults = RetentionSettings::default();

        Ok(Config {
            database_url: non_empty_var("DATABASE_URL"),

            port: parse_var("PORT")?.unwrap_or(5000),

            twitter_bearer_token: non_empty_var("TWITTER_BEARER_TOKEN")
                .or_else(|| non_empty_var("TWITTER_API_KEY")),

            twitter_api_base: env::var("TWITTER_API_BASE")
                .unwrap_or_else(|_| "https://api.twitter.com".to_string()),

            gemini_api_key: non_empty_var("GEMINI_API_KEY"),

            gemini_pro_model: env::var("GEMINI_PRO_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-pro".to_string()),

            gemini_flash_model: env::var("GEMINI_FLASH_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),

            gemini_api_base: env::var("GEMINI_API_BASE")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),

            ingest: IngestSettings {
                delay_between_users: parse_var("FETCH_DELAY_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(ingest_defaults.delay_between_users),
                bootstrap_batch: parse_var("BOOTSTRAP_BATCH")?
                    .unwrap_or(ingest_defaults.bootstrap_batch),
                incremental_batch: parse_var("INCREMENTAL_BATCH")?
                    .unwrap_or(ingest_defaults.incremental_batch),
            },

            retention: RetentionSettings {
                cleanup_interval: parse_var("CLEANUP_INTERVAL_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(retention_defaults.cleanup_interval),
                used_post_max_age: parse_var("USED_POST_RETENTION_HOURS")?
                    .map(chrono::Duration::hours)
                    .unwrap_or(retention_defaults.used_post_max_age),
                posted_record_max_age: parse_var("POSTED_RECORD_RETENTION_DAYS")?
                    .map(chrono::Duration::days)
                    .unwrap_or(retention_defaults.posted_record_max_age),
            },
        })
    }

    /// Configuration with no credentials, an in-memory store and no delays
    pub fn for_local() -> Self {
        Config {
            database_url: None,
            port: 5000,
            twitter_bearer_token: None,
            twitter_api_base: "https://api.twitter.com".to_string(),
            gemini_api_key: None,
            gemini_pro_model: "gemini-2.5-pro".to_string(),
            gemini_flash_model: "gemini-2.5-flash".to_string(),
            gemini_api_base: "https://generativelanguage.googleapis.com".to_string(),
            ingest: IngestSettings {
                delay_between_users: Duration::ZERO,
                ..IngestSettings::default()
            },
            retention: RetentionSettings::default(),
        }
    }

    /// Validate that all required services are accessible
    pub async fn validate(&self) -> Result<()> {
        log::info!("Validating configuration...");

        if self.twitter_bearer_token.is_none() {
            log::warn!("TWITTER_BEARER_TOKEN not set - timeline fetching is disabled");
        }
        if self.gemini_api_key.is_none() {
            log::warn!("GEMINI_API_KEY not set - content generation is disabled");
        }

        let Some(database_url) = &self.database_url else {
            log::warn!("DATABASE_URL not set - using in-memory store, data is lost on restart");
            return Ok(());
        };

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .context("Database connection test query failed")?;

        log::info!("Configuration validated successfully");
        Ok(())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e)),
        None => Ok(None),
    }
}

//! Environment configuration for the ingest pipeline.
//!
//! Everything except `DATABASE_URL` has a default. All validation
//! happens here, before any network or store activity.

use std::{str::FromStr, time::Duration};

use ticket_map_source::{
    retry::RetryPolicy,
    socrata::{DEFAULT_BASE_URL, SocrataConfig},
};
use ticket_map_source_models::Dataset;

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    #[error("{0} must be set")]
    Missing(&'static str),

    /// A variable holds a value that cannot be used.
    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A dataset filter names an unsupported dataset.
    #[error("Unknown dataset '{0}'")]
    UnknownDataset(String),
}

/// Resolved pipeline settings.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Dataset API settings.
    pub socrata: SocrataConfig,
    /// Records per upsert statement.
    pub batch_size: usize,
    /// Datasets included in multi-dataset cycles.
    pub datasets: Vec<Dataset>,
    /// Scheduler interval between cycle starts.
    pub sync_interval: Duration,
}

impl IngestConfig {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `DATABASE_URL` is missing or any value
    /// is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `DATABASE_URL` is missing or any value
    /// is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let defaults = SocrataConfig::default();
        let socrata = SocrataConfig {
            base_url: get("TICKETS_API_BASE").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            app_token: get("SOCRATA_APP_TOKEN"),
            page_size: positive(&get, "TICKETS_PAGE_SIZE", defaults.page_size)?,
            page_delay: Duration::from_millis(parse(
                &get,
                "TICKETS_PAGE_DELAY_MS",
                duration_millis(defaults.page_delay),
            )?),
            timeout: Duration::from_secs(positive(
                &get,
                "TICKETS_HTTP_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
            retry: RetryPolicy {
                max_attempts: positive(
                    &get,
                    "TICKETS_MAX_ATTEMPTS",
                    defaults.retry.max_attempts,
                )?,
                initial_backoff: Duration::from_millis(parse(
                    &get,
                    "TICKETS_INITIAL_BACKOFF_MS",
                    duration_millis(defaults.retry.initial_backoff),
                )?),
            },
        };

        let datasets = match get("TICKETS_DATASETS") {
            Some(filter) => parse_datasets(&filter)?,
            None => Dataset::ALL.to_vec(),
        };

        Ok(Self {
            database_url,
            socrata,
            batch_size: positive(&get, "TICKETS_BATCH_SIZE", 500)?,
            datasets,
            sync_interval: Duration::from_secs(positive(
                &get,
                "TICKETS_SYNC_INTERVAL_SECS",
                900,
            )?),
        })
    }
}

/// Parses a comma-separated list of dataset ids, dropping blanks and
/// duplicates while keeping order.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownDataset`] for the first unsupported id.
pub fn parse_datasets(filter: &str) -> Result<Vec<Dataset>, ConfigError> {
    let mut datasets = Vec::new();
    for id in filter.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let dataset =
            Dataset::from_str(id).map_err(|_| ConfigError::UnknownDataset(id.to_string()))?;
        if !datasets.contains(&dataset) {
            datasets.push(dataset);
        }
    }
    Ok(datasets)
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(name).map_or(Ok(default), |value| {
        value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        })
    })
}

fn positive<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let value = parse(get, name, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: get(name).unwrap_or_default(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

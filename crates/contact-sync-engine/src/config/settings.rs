//! Process-level engine settings loaded from the environment.

use contact_sync_core::AccountId;
use std::time::Duration;

use super::ConfigError;

const DEFAULT_MAX_CONCURRENCY: usize = 8;
const DEFAULT_ACCOUNT_DEADLINE_SECS: u64 = 300;
const DEFAULT_DEDUP_CAPACITY: u64 = 10_000;
const DEFAULT_DEDUP_TTL_SECS: u64 = 86_400;
const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Settings that are fixed for the lifetime of the engine.
///
/// Unlike [`Configuration`](super::Configuration) these are not reloaded per
/// run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// The authoritative account whose changes are propagated.
    pub source_account: AccountId,
    /// Upper bound on targets processed at the same time.
    pub max_concurrency: usize,
    /// Overall time budget for one target, retries included.
    pub account_deadline: Duration,
    /// Number of event ids remembered for deduplication.
    pub dedup_capacity: u64,
    /// How long an event id is remembered.
    pub dedup_ttl: Duration,
    /// How long operation records are kept by the store.
    pub retention_days: u32,
}

impl EngineSettings {
    /// Load settings from environment variables.
    ///
    /// Required:
    /// - `CONTACT_SYNC_SOURCE_ACCOUNT`: the source (management) account id
    ///
    /// Optional:
    /// - `CONTACT_SYNC_MAX_CONCURRENCY`: parallel targets (default: 8)
    /// - `CONTACT_SYNC_ACCOUNT_DEADLINE_SECS`: per-target deadline (default: 300)
    /// - `CONTACT_SYNC_DEDUP_CAPACITY`: remembered event ids (default: 10000)
    /// - `CONTACT_SYNC_DEDUP_TTL_SECS`: dedup window (default: 86400)
    /// - `CONTACT_SYNC_RETENTION_DAYS`: record retention (default: 90)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load settings from a custom variable reader.
    ///
    /// Lets tests supply variables without touching the process environment.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let source_account = reader("CONTACT_SYNC_SOURCE_ACCOUNT")
            .map_err(|_| ConfigError::MissingVar("CONTACT_SYNC_SOURCE_ACCOUNT".into()))?;
        let source_account = AccountId::new(source_account).map_err(|e| {
            ConfigError::InvalidValue("CONTACT_SYNC_SOURCE_ACCOUNT".into(), e.to_string())
        })?;

        let max_concurrency = parse_or(
            &reader,
            "CONTACT_SYNC_MAX_CONCURRENCY",
            DEFAULT_MAX_CONCURRENCY,
        )?;
        let deadline_secs = parse_or(
            &reader,
            "CONTACT_SYNC_ACCOUNT_DEADLINE_SECS",
            DEFAULT_ACCOUNT_DEADLINE_SECS,
        )?;
        let dedup_capacity = parse_or(&reader, "CONTACT_SYNC_DEDUP_CAPACITY", DEFAULT_DEDUP_CAPACITY)?;
        let dedup_ttl_secs = parse_or(&reader, "CONTACT_SYNC_DEDUP_TTL_SECS", DEFAULT_DEDUP_TTL_SECS)?;
        let retention_days = parse_or(&reader, "CONTACT_SYNC_RETENTION_DAYS", DEFAULT_RETENTION_DAYS)?;

        EngineSettingsBuilder::new(source_account)
            .max_concurrency(max_concurrency)
            .account_deadline(Duration::from_secs(deadline_secs))
            .dedup_capacity(dedup_capacity)
            .dedup_ttl(Duration::from_secs(dedup_ttl_secs))
            .retention_days(retention_days)
            .build()
    }

    /// Create a builder with default values for everything but the source.
    #[must_use]
    pub fn builder(source_account: AccountId) -> EngineSettingsBuilder {
        EngineSettingsBuilder::new(source_account)
    }

    /// Retention as a calendar duration.
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

fn parse_or<F, T>(reader: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match reader(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Builder for [`EngineSettings`].
#[derive(Debug, Clone)]
pub struct EngineSettingsBuilder {
    settings: EngineSettings,
}

impl EngineSettingsBuilder {
    /// Create a builder with default values.
    #[must_use]
    pub fn new(source_account: AccountId) -> Self {
        Self {
            settings: EngineSettings {
                source_account,
                max_concurrency: DEFAULT_MAX_CONCURRENCY,
                account_deadline: Duration::from_secs(DEFAULT_ACCOUNT_DEADLINE_SECS),
                dedup_capacity: DEFAULT_DEDUP_CAPACITY,
                dedup_ttl: Duration::from_secs(DEFAULT_DEDUP_TTL_SECS),
                retention_days: DEFAULT_RETENTION_DAYS,
            },
        }
    }

    #[must_use]
    pub fn max_concurrency(mut self, value: usize) -> Self {
        self.settings.max_concurrency = value;
        self
    }

    #[must_use]
    pub fn account_deadline(mut self, value: Duration) -> Self {
        self.settings.account_deadline = value;
        self
    }

    #[must_use]
    pub fn dedup_capacity(mut self, value: u64) -> Self {
        self.settings.dedup_capacity = value;
        self
    }

    #[must_use]
    pub fn dedup_ttl(mut self, value: Duration) -> Self {
        self.settings.dedup_ttl = value;
        self
    }

    #[must_use]
    pub fn retention_days(mut self, value: u32) -> Self {
        self.settings.retention_days = value;
        self
    }

    /// Validate and build the settings.
    pub fn build(self) -> Result<EngineSettings, ConfigError> {
        let s = &self.settings;
        if s.max_concurrency == 0 {
            return Err(ConfigError::invalid("max_concurrency", "must be at least 1"));
        }
        if s.account_deadline.is_zero() {
            return Err(ConfigError::invalid(
                "account_deadline",
                "must be greater than zero",
            ));
        }
        if s.dedup_capacity == 0 {
            return Err(ConfigError::invalid("dedup_capacity", "must be at least 1"));
        }
        if s.dedup_ttl.is_zero() {
            return Err(ConfigError::invalid("dedup_ttl", "must be greater than zero"));
        }
        if s.retention_days == 0 {
            return Err(ConfigError::invalid("retention_days", "must be at least 1"));
        }
        Ok(self.settings)
    }
}

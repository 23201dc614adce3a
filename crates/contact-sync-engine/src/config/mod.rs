//! Sync configuration.
//!
//! A [`Configuration`] is validated once, when it is built or deserialized,
//! and is immutable afterwards. Runs hold it behind an `Arc` so a later write
//! to the [`ConfigurationSource`] never changes a run in flight.

mod settings;
mod source;

pub use settings::{EngineSettings, EngineSettingsBuilder};
pub use source::{ConfigurationSource, InMemoryConfigurationSource, VersionedConfiguration};

#[cfg(feature = "postgres")]
pub use source::PgConfigurationSource;

use contact_sync_core::{AccountId, ContactKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

use crate::error::SyncError;

/// Configuration loading or validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing required variable: {0}")]
    MissingVar(String),

    /// A variable or field had a value that could not be used.
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue(field.to_string(), reason.into())
    }
}

impl From<ConfigError> for SyncError {
    fn from(err: ConfigError) -> Self {
        SyncError::configuration(err.to_string())
    }
}

/// Retry behavior applied to directory calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Multiplier applied per retry.
    pub backoff_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Check the policy bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::invalid(
                "retry_policy.max_attempts",
                "must be at least 1",
            ));
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError::invalid(
                "retry_policy.base_delay_ms",
                "must be greater than zero",
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid(
                "retry_policy.max_delay_ms",
                "must be greater than or equal to base_delay_ms",
            ));
        }
        if !(self.backoff_base.is_finite() && self.backoff_base > 1.0) {
            return Err(ConfigError::invalid(
                "retry_policy.backoff_base",
                "must be a finite number greater than 1",
            ));
        }
        Ok(())
    }
}

/// Names of the registered channels used for notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelNames {
    pub primary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            primary: "primary".to_string(),
            fallback: Some("fallback".to_string()),
        }
    }
}

/// When and where to notify about finished operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPolicy {
    pub notify_on_failure: bool,
    pub notify_on_success: bool,
    pub notify_on_partial_failure: bool,
    /// Minimum failed targets before a partial failure is reported.
    pub failure_threshold: u32,
    pub channels: ChannelNames,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            notify_on_failure: true,
            notify_on_success: false,
            notify_on_partial_failure: true,
            failure_threshold: 1,
            channels: ChannelNames::default(),
        }
    }
}

impl NotificationPolicy {
    /// Check channel names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.primary.trim().is_empty() {
            return Err(ConfigError::invalid(
                "notification_policy.channels.primary",
                "cannot be blank",
            ));
        }
        if let Some(fallback) = &self.channels.fallback {
            if fallback.trim().is_empty() {
                return Err(ConfigError::invalid(
                    "notification_policy.channels.fallback",
                    "cannot be blank",
                ));
            }
        }
        Ok(())
    }
}

/// Unvalidated configuration, as stored and exchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfiguration {
    pub contact_kinds: Vec<ContactKind>,
    pub excluded_accounts: Vec<AccountId>,
    pub retry_policy: RetryPolicy,
    pub notification_policy: NotificationPolicy,
}

impl Default for RawConfiguration {
    fn default() -> Self {
        Self {
            contact_kinds: ContactKind::ALL.to_vec(),
            excluded_accounts: Vec::new(),
            retry_policy: RetryPolicy::default(),
            notification_policy: NotificationPolicy::default(),
        }
    }
}

impl RawConfiguration {
    /// Validate and freeze.
    pub fn validate(self) -> Result<Configuration, ConfigError> {
        self.retry_policy.validate()?;
        self.notification_policy.validate()?;

        Ok(Configuration {
            contact_kinds: self.contact_kinds.into_iter().collect(),
            excluded_accounts: self.excluded_accounts.into_iter().collect(),
            retry_policy: self.retry_policy,
            notification_policy: self.notification_policy,
        })
    }
}

/// Validated, immutable sync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawConfiguration", into = "RawConfiguration")]
pub struct Configuration {
    contact_kinds: BTreeSet<ContactKind>,
    excluded_accounts: BTreeSet<AccountId>,
    retry_policy: RetryPolicy,
    notification_policy: NotificationPolicy,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            contact_kinds: ContactKind::ALL.into_iter().collect(),
            excluded_accounts: BTreeSet::new(),
            retry_policy: RetryPolicy::default(),
            notification_policy: NotificationPolicy::default(),
        }
    }
}

impl Configuration {
    /// Create a new configuration builder starting from the defaults.
    #[must_use]
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    /// Contact kinds that are propagated.
    pub fn contact_kinds(&self) -> &BTreeSet<ContactKind> {
        &self.contact_kinds
    }

    /// Accounts that never receive propagated contacts.
    pub fn excluded_accounts(&self) -> &BTreeSet<AccountId> {
        &self.excluded_accounts
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn notification_policy(&self) -> &NotificationPolicy {
        &self.notification_policy
    }

    /// Whether changes of `kind` are propagated.
    pub fn is_kind_enabled(&self, kind: ContactKind) -> bool {
        self.contact_kinds.contains(&kind)
    }

    /// Whether `account` is excluded from propagation.
    pub fn is_excluded(&self, account: &AccountId) -> bool {
        self.excluded_accounts.contains(account)
    }

    /// Convert back to the raw, editable form.
    pub fn to_raw(&self) -> RawConfiguration {
        RawConfiguration {
            contact_kinds: self.contact_kinds.iter().copied().collect(),
            excluded_accounts: self.excluded_accounts.iter().cloned().collect(),
            retry_policy: self.retry_policy.clone(),
            notification_policy: self.notification_policy.clone(),
        }
    }
}

impl TryFrom<RawConfiguration> for Configuration {
    type Error = ConfigError;

    fn try_from(raw: RawConfiguration) -> Result<Self, Self::Error> {
        raw.validate()
    }
}

impl From<Configuration> for RawConfiguration {
    fn from(config: Configuration) -> Self {
        RawConfiguration {
            contact_kinds: config.contact_kinds.into_iter().collect(),
            excluded_accounts: config.excluded_accounts.into_iter().collect(),
            retry_policy: config.retry_policy,
            notification_policy: config.notification_policy,
        }
    }
}

/// Builder for [`Configuration`].
#[derive(Debug, Clone, Default)]
pub struct ConfigurationBuilder {
    raw: RawConfiguration,
}

impl ConfigurationBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of propagated contact kinds.
    #[must_use]
    pub fn contact_kinds(mut self, kinds: impl IntoIterator<Item = ContactKind>) -> Self {
        self.raw.contact_kinds = kinds.into_iter().collect();
        self
    }

    /// Exclude an account from propagation.
    #[must_use]
    pub fn exclude(mut self, account: AccountId) -> Self {
        self.raw.excluded_accounts.push(account);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.raw.retry_policy = policy;
        self
    }

    /// Set the notification policy.
    #[must_use]
    pub fn notification_policy(mut self, policy: NotificationPolicy) -> Self {
        self.raw.notification_policy = policy;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<Configuration, ConfigError> {
        self.raw.validate()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

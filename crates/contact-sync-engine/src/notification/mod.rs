//! Notification escalation.
//!
//! After every terminal status write the escalator evaluates the
//! notification policy, formats a message and delivers it on the primary
//! channel, falling back to the secondary channel when delivery fails.

mod channel;
mod escalator;
mod formatter;
mod policy;
mod webhook;

pub use channel::{
    ChannelRegistry, DeliveryOutcome, NotificationChannel, NotificationDeliveryError,
    TracingChannel,
};
pub use escalator::{ChannelAttempt, DeliveryReport, NotificationEscalator};
pub use formatter::format_notification;
pub use policy::{classify, evaluate};
pub use webhook::{compute_signature, WebhookChannel, WebhookChannelConfig};

use chrono::{DateTime, Utc};
use contact_sync_core::{AccountId, ContactKind, NotificationId, SyncId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// The operation failed before any target was processed.
    SystemError,
    /// Every target failed.
    CompleteFailure,
    /// Some targets failed.
    PartialFailure,
    /// No target failed.
    Success,
}

impl NotificationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::SystemError => "SYSTEM_ERROR",
            NotificationKind::CompleteFailure => "COMPLETE_FAILURE",
            NotificationKind::PartialFailure => "PARTIAL_FAILURE",
            NotificationKind::Success => "SUCCESS",
        }
    }

    /// Priority a notification of this kind is sent with.
    #[must_use]
    pub fn priority(&self) -> Priority {
        match self {
            NotificationKind::SystemError | NotificationKind::CompleteFailure => Priority::High,
            NotificationKind::PartialFailure => Priority::Medium,
            NotificationKind::Success => Priority::Low,
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
        })
    }
}

/// Counts attached to a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMetadata {
    pub contact_kind: ContactKind,
    pub source_account_id: AccountId,
    pub initiating_principal: String,
    pub total_count: usize,
    pub successful_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    /// Failed targets whose error was an authorization failure.
    pub permission_error_count: usize,
    /// `failed_count / total_count`, `0.0` without targets.
    pub failure_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// A formatted notification about one sync operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub sync_id: SyncId,
    pub kind: NotificationKind,
    pub priority: Priority,
    pub title: String,
    pub body: String,
    pub metadata: NotificationMetadata,
    pub created_at: DateTime<Utc>,
}

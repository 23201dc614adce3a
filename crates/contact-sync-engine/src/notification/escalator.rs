//! Primary/fallback notification delivery.

use contact_sync_core::SyncOperation;
use tracing::{error, info, instrument, warn};

use super::channel::{ChannelRegistry, DeliveryOutcome, NotificationDeliveryError};
use super::policy::evaluate;
use super::Notification;
use crate::config::NotificationPolicy;
use crate::error::SyncError;

/// One delivery attempt on a named channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelAttempt {
    pub channel: String,
    pub result: Result<DeliveryOutcome, NotificationDeliveryError>,
}

impl ChannelAttempt {
    /// Whether the channel accepted the notification without error.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// What happened to one notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub notification: Notification,
    pub primary: ChannelAttempt,
    /// Present only when the primary attempt failed and a fallback is configured.
    pub fallback: Option<ChannelAttempt>,
    /// Whether some channel reported [`DeliveryOutcome::Delivered`].
    pub delivered: bool,
}

impl DeliveryReport {
    /// Whether every attempted channel failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        !self.primary.is_ok() && self.fallback.as_ref().map_or(true, |f| !f.is_ok())
    }

    /// The last delivery error when every attempted channel failed.
    #[must_use]
    pub fn error(&self) -> Option<SyncError> {
        if !self.failed() {
            return None;
        }
        let last = self.fallback.as_ref().unwrap_or(&self.primary);
        match &last.result {
            Err(e) => Some(SyncError::notification_delivery(&last.channel, e.to_string())),
            Ok(_) => None,
        }
    }
}

/// Decides whether an operation needs a notification and delivers it.
#[derive(Debug, Clone)]
pub struct NotificationEscalator {
    channels: ChannelRegistry,
}

impl NotificationEscalator {
    #[must_use]
    pub fn new(channels: ChannelRegistry) -> Self {
        Self { channels }
    }

    /// Channels the escalator sends on.
    #[must_use]
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Evaluate `policy` for a terminal `operation` and deliver the result.
    ///
    /// Returns `None` when no notification is due. Delivery failures are
    /// logged and reported, never raised.
    #[instrument(skip_all, fields(sync_id = %operation.sync_id, status = %operation.status))]
    pub async fn escalate(
        &self,
        operation: &SyncOperation,
        policy: &NotificationPolicy,
    ) -> Option<DeliveryReport> {
        let notification = evaluate(operation, policy)?;
        let names = &policy.channels;

        let primary = self.attempt(&names.primary, &notification).await;
        let fallback = match (&primary.result, &names.fallback) {
            (Err(e), Some(fallback)) => {
                warn!(
                    channel = %names.primary,
                    fallback = %fallback,
                    error = %e,
                    "Primary notification channel failed, using fallback"
                );
                Some(self.attempt(fallback, &notification).await)
            }
            _ => None,
        };

        let delivered = std::iter::once(&primary)
            .chain(fallback.as_ref())
            .any(|a| matches!(a.result, Ok(DeliveryOutcome::Delivered)));

        let report = DeliveryReport {
            notification,
            primary,
            fallback,
            delivered,
        };

        if let Some(err) = report.error() {
            error!(
                error = %err,
                kind = %report.notification.kind,
                priority = %report.notification.priority,
                title = %report.notification.title,
                "Notification could not be delivered on any channel"
            );
        } else {
            info!(
                kind = %report.notification.kind,
                priority = %report.notification.priority,
                delivered = report.delivered,
                "Notification dispatched"
            );
        }
        Some(report)
    }

    async fn attempt(&self, channel: &str, notification: &Notification) -> ChannelAttempt {
        let result = self.channels.send(channel, notification).await;
        if let Ok(DeliveryOutcome::NoRecipient) = result {
            info!(channel, "Notification channel has no recipients");
        }
        ChannelAttempt {
            channel: channel.to_string(),
            result,
        }
    }
}

//! Notification delivery channels.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::{Notification, Priority};

/// What a channel did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the channel.
    Delivered,
    /// The channel works but nobody is subscribed. Not an error.
    NoRecipient,
}

/// Error raised when a channel could not deliver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationDeliveryError {
    /// No channel is registered under the name.
    #[error("channel not registered: {name}")]
    UnknownChannel { name: String },

    /// The request never got a response.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The receiver answered with a non-success status.
    #[error("rejected with HTTP {status}")]
    Rejected { status: u16 },

    /// The notification could not be encoded.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Channel-specific failure.
    #[error("{message}")]
    Other { message: String },
}

impl NotificationDeliveryError {
    /// Create a channel-specific failure.
    pub fn other(message: impl Into<String>) -> Self {
        NotificationDeliveryError::Other {
            message: message.into(),
        }
    }
}

/// Somewhere notifications can be sent.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver one notification.
    async fn send(
        &self,
        notification: &Notification,
    ) -> Result<DeliveryOutcome, NotificationDeliveryError>;
}

/// Channels addressable by name.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `channel` under `name`, replacing any previous one.
    #[must_use]
    pub fn with_channel(
        mut self,
        name: impl Into<String>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        self.register(name, channel);
        self
    }

    /// Register `channel` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, channel: Arc<dyn NotificationChannel>) {
        let name = name.into();
        if self.channels.insert(name.clone(), channel).is_some() {
            warn!(channel = %name, "Replaced notification channel");
        }
    }

    /// Look up a channel.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.get(name).cloned()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Send on the named channel.
    pub async fn send(
        &self,
        name: &str,
        notification: &Notification,
    ) -> Result<DeliveryOutcome, NotificationDeliveryError> {
        let channel = self
            .get(name)
            .ok_or_else(|| NotificationDeliveryError::UnknownChannel {
                name: name.to_string(),
            })?;
        channel.send(notification).await
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.names())
            .finish()
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingChannel;

#[async_trait]
impl NotificationChannel for TracingChannel {
    async fn send(
        &self,
        notification: &Notification,
    ) -> Result<DeliveryOutcome, NotificationDeliveryError> {
        let meta = &notification.metadata;
        match notification.priority {
            Priority::High | Priority::Medium => warn!(
                target: "contact_sync_notification",
                sync_id = %notification.sync_id,
                kind = %notification.kind,
                priority = %notification.priority,
                failed = meta.failed_count,
                total = meta.total_count,
                "{}\n{}",
                notification.title,
                notification.body
            ),
            Priority::Low => info!(
                target: "contact_sync_notification",
                sync_id = %notification.sync_id,
                kind = %notification.kind,
                priority = %notification.priority,
                total = meta.total_count,
                "{}",
                notification.title
            ),
        }
        Ok(DeliveryOutcome::Delivered)
    }
}

//! HTTP webhook channel.
//!
//! Notifications are POSTed as JSON. When a secret is configured the body is
//! signed with HMAC-SHA256 over `{timestamp}.{body}` and the hex digest is
//! sent as `X-Webhook-Signature: sha256=<hex>` next to `X-Webhook-Timestamp`.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

use super::channel::{DeliveryOutcome, NotificationChannel, NotificationDeliveryError};
use super::Notification;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signing timestamp (unix seconds).
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Header carrying the notification id.
pub const NOTIFICATION_ID_HEADER: &str = "X-Notification-ID";

/// Where and how to deliver webhook notifications.
#[derive(Debug, Clone)]
pub struct WebhookChannelConfig {
    pub url: String,
    pub secret: Option<String>,
    pub timeout: Duration,
}

impl WebhookChannelConfig {
    /// Unsigned delivery to `url` with a 10 second timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
            timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Compute the hex HMAC-SHA256 of `{timestamp}.{body}` keyed by `secret`.
pub fn compute_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, NotificationDeliveryError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| NotificationDeliveryError::other(format!("invalid signing key: {e}")))?;

    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Delivers notifications to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    config: WebhookChannelConfig,
    client: Client,
}

impl WebhookChannel {
    /// Build the channel and its HTTP client. Redirects are not followed.
    pub fn new(config: WebhookChannelConfig) -> Result<Self, NotificationDeliveryError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| NotificationDeliveryError::other(format!("http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn headers(
        &self,
        notification: &Notification,
        body: &[u8],
    ) -> Result<HeaderMap, NotificationDeliveryError> {
        let timestamp = Utc::now().timestamp().to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(TIMESTAMP_HEADER, header_value(&timestamp)?);
        headers.insert(
            NOTIFICATION_ID_HEADER,
            header_value(&notification.id.to_string())?,
        );

        if let Some(secret) = &self.config.secret {
            let signature = compute_signature(secret, &timestamp, body)?;
            headers.insert(SIGNATURE_HEADER, header_value(&format!("sha256={signature}"))?);
        }
        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, NotificationDeliveryError> {
    HeaderValue::from_str(value)
        .map_err(|e| NotificationDeliveryError::other(format!("invalid header value: {e}")))
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(
        &self,
        notification: &Notification,
    ) -> Result<DeliveryOutcome, NotificationDeliveryError> {
        let body = serde_json::to_vec(notification).map_err(|e| {
            NotificationDeliveryError::Serialization {
                message: e.to_string(),
            }
        })?;
        let headers = self.headers(notification, &body)?;

        let response = self
            .client
            .post(&self.config.url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    format!("request timeout ({}s)", self.config.timeout.as_secs())
                } else if e.is_connect() {
                    format!("connection failed: {e}")
                } else {
                    format!("request error: {e}")
                };
                NotificationDeliveryError::Transport { message }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!(
                sync_id = %notification.sync_id,
                status = status.as_u16(),
                "Webhook notification delivered"
            );
            Ok(DeliveryOutcome::Delivered)
        } else {
            warn!(
                sync_id = %notification.sync_id,
                status = status.as_u16(),
                "Webhook notification rejected"
            );
            Err(NotificationDeliveryError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

//! Sync engine error types
//!
//! Errors carry the sync/account context they occurred in and classify
//! themselves as transient or permanent for retry decisions.

use contact_sync_core::{AccountId, ParseIdError, SyncId, SyncStatus, ValidationError};
use thiserror::Error;

use crate::directory::DirectoryError;

/// Error that can occur while running a sync operation.
#[derive(Debug, Error)]
pub enum SyncError {
    // Ingestion
    /// Raw payload was missing required fields or had unparseable values.
    #[error("malformed event: {message}")]
    MalformedEvent { message: String },

    // Directory
    /// The account directory could not be enumerated.
    #[error("account directory unavailable: {message}")]
    DirectoryUnavailable { message: String },

    /// A target call failed with a retryable error.
    #[error("transient failure on account {account_id} ({code}): {message}")]
    TransientTarget {
        account_id: AccountId,
        code: String,
        message: String,
    },

    /// A target call failed with a non-retryable error.
    #[error("permanent failure on account {account_id} ({code}): {message}")]
    PermanentTarget {
        account_id: AccountId,
        code: String,
        message: String,
    },

    // State tracking
    /// A result already exists for this (sync, account) pair.
    #[error("result for account {account_id} already recorded in sync {sync_id}")]
    DuplicateResult {
        sync_id: SyncId,
        account_id: AccountId,
    },

    /// An operation with this id already exists.
    #[error("sync operation {sync_id} already exists")]
    DuplicateOperation { sync_id: SyncId },

    /// The requested status change is not allowed.
    #[error("sync {sync_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        sync_id: SyncId,
        from: SyncStatus,
        to: SyncStatus,
    },

    /// A terminal status was requested before every target had a result.
    #[error("sync {sync_id}: {missing} target(s) without a result")]
    IncompleteResults { sync_id: SyncId, missing: usize },

    /// A result was recorded for an account outside the target list.
    #[error("account {account_id} is not a target of sync {sync_id}")]
    UnknownTarget {
        sync_id: SyncId,
        account_id: AccountId,
    },

    /// Results can only be recorded while the operation is in progress.
    #[error("sync {sync_id} is {status}, results can only be recorded while IN_PROGRESS")]
    NotInProgress { sync_id: SyncId, status: SyncStatus },

    /// Targets can only be assigned while the operation is pending.
    #[error("sync {sync_id} is {status}, targets can only be assigned while PENDING")]
    TargetsFrozen { sync_id: SyncId, status: SyncStatus },

    /// No operation with this id exists.
    #[error("sync operation {sync_id} not found")]
    NotFound { sync_id: SyncId },

    // Notification
    /// A notification could not be delivered on any channel.
    #[error("notification delivery failed on {channel}: {message}")]
    NotificationDelivery { channel: String, message: String },

    // Infrastructure
    /// Configuration is invalid or unavailable.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Backing store failure.
    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Check if this error is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::DirectoryUnavailable { .. }
                | SyncError::TransientTarget { .. }
                | SyncError::Storage { .. }
                | SyncError::NotificationDelivery { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::MalformedEvent { .. } => "MALFORMED_EVENT",
            SyncError::DirectoryUnavailable { .. } => "DIRECTORY_UNAVAILABLE",
            SyncError::TransientTarget { .. } => "TRANSIENT_TARGET",
            SyncError::PermanentTarget { .. } => "PERMANENT_TARGET",
            SyncError::DuplicateResult { .. } => "DUPLICATE_RESULT",
            SyncError::DuplicateOperation { .. } => "DUPLICATE_OPERATION",
            SyncError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SyncError::IncompleteResults { .. } => "INCOMPLETE_RESULTS",
            SyncError::UnknownTarget { .. } => "UNKNOWN_TARGET",
            SyncError::NotInProgress { .. } => "NOT_IN_PROGRESS",
            SyncError::TargetsFrozen { .. } => "TARGETS_FROZEN",
            SyncError::NotFound { .. } => "NOT_FOUND",
            SyncError::NotificationDelivery { .. } => "NOTIFICATION_DELIVERY",
            SyncError::Configuration { .. } => "CONFIGURATION_ERROR",
            SyncError::Storage { .. } => "STORAGE_ERROR",
            SyncError::Serialization { .. } => "SERIALIZATION_ERROR",
            SyncError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    // Convenience constructors

    /// Create a malformed event error.
    pub fn malformed(message: impl Into<String>) -> Self {
        SyncError::MalformedEvent {
            message: message.into(),
        }
    }

    /// Create a directory unavailable error.
    pub fn directory_unavailable(message: impl Into<String>) -> Self {
        SyncError::DirectoryUnavailable {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        SyncError::Configuration {
            message: message.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        SyncError::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with source.
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        SyncError::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Classify a directory error raised while updating `account_id`.
    pub fn target(account_id: AccountId, err: &DirectoryError) -> Self {
        let code = err.error_code().to_string();
        let message = err.to_string();
        if err.is_transient() {
            SyncError::TransientTarget {
                account_id,
                code,
                message,
            }
        } else {
            SyncError::PermanentTarget {
                account_id,
                code,
                message,
            }
        }
    }

    /// Create a notification delivery error.
    pub fn notification_delivery(channel: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::NotificationDelivery {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        SyncError::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<ParseIdError> for SyncError {
    fn from(err: ParseIdError) -> Self {
        SyncError::MalformedEvent {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::storage_with_source("database operation failed", err)
    }
}

/// Result type for sync engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

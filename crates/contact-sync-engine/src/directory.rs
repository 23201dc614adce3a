//! Account directory abstraction.
//!
//! The directory lists the dependent accounts of an organization and reads or
//! writes contact information on a single account. How it talks to the
//! provider is up to the implementation; the engine only sees
//! [`AccountDirectory`] and the classified [`DirectoryError`].

use async_trait::async_trait;
use contact_sync_core::{AccountId, ContactKind, ContactPayload};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Membership status of an account in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Suspended,
    PendingClosure,
    Closed,
}

impl AccountStatus {
    /// Whether contact changes should be propagated to this account.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

/// One account entry returned by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryAccount {
    pub id: AccountId,
    pub status: AccountStatus,
}

impl DirectoryAccount {
    /// Create an account entry.
    #[must_use]
    pub fn new(id: AccountId, status: AccountStatus) -> Self {
        Self { id, status }
    }
}

/// A page of accounts plus the continuation token, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPage {
    pub accounts: Vec<DirectoryAccount>,
    pub next_token: Option<String>,
}

/// Error raised by an [`AccountDirectory`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    // Transient
    /// The provider rate-limited the request.
    #[error("throttled: {message}")]
    Throttled { message: String },

    /// The call did not finish in time.
    #[error("directory call timed out")]
    Timeout,

    /// The provider is temporarily unavailable.
    #[error("service unavailable: {message}")]
    Unavailable { message: String },

    /// The circuit breaker rejected the call without contacting the provider.
    #[error("circuit breaker open")]
    CircuitOpen,

    // Permanent
    /// The engine is not allowed to act on the account.
    #[error("access denied: {message}")]
    AccessDenied { message: String },

    /// The provider rejected the request contents.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// The account or resource does not exist.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// The request conflicts with the current state of the account.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// A provider code without a dedicated variant.
    #[error("{code}: {message}")]
    Provider {
        code: String,
        message: String,
        transient: bool,
    },
}

impl DirectoryError {
    /// Classify a provider error code.
    ///
    /// Known codes map to a dedicated variant. Unknown codes are classified by
    /// pattern (`throttl`/`limit` transient, `access`/`denied`/`unauthorized`
    /// and `invalid`/`validation` permanent) and otherwise treated as
    /// transient.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "Throttling" | "ThrottlingException" | "TooManyRequestsException"
            | "RequestLimitExceeded" => DirectoryError::Throttled { message },
            "RequestTimeout" | "RequestTimeoutException" => DirectoryError::Timeout,
            "ServiceUnavailable" | "ServiceUnavailableException" | "InternalServerError"
            | "InternalFailure" => DirectoryError::Unavailable { message },
            "AccessDenied" | "AccessDeniedException" | "Unauthorized"
            | "UnauthorizedOperation" | "Forbidden" | "ForbiddenException" => {
                DirectoryError::AccessDenied { message }
            }
            "Validation" | "ValidationException" | "InvalidParameter"
            | "InvalidParameterValue" => DirectoryError::Validation { message },
            "ResourceNotFound" | "ResourceNotFoundException" | "AccountNotFound"
            | "AccountNotFoundException" => DirectoryError::NotFound { message },
            "Conflict" | "ConflictException" => DirectoryError::Conflict { message },
            other => {
                let lower = other.to_lowercase();
                if lower.contains("throttl") || lower.contains("limit") {
                    DirectoryError::Throttled { message }
                } else if lower.contains("access")
                    || lower.contains("denied")
                    || lower.contains("unauthorized")
                {
                    DirectoryError::AccessDenied { message }
                } else if lower.contains("invalid") || lower.contains("validation") {
                    DirectoryError::Validation { message }
                } else {
                    DirectoryError::Provider {
                        code: other.to_string(),
                        message,
                        transient: true,
                    }
                }
            }
        }
    }

    /// Check if the call may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            DirectoryError::Throttled { .. }
            | DirectoryError::Timeout
            | DirectoryError::Unavailable { .. }
            | DirectoryError::CircuitOpen => true,
            DirectoryError::Provider { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Whether this is an authorization failure.
    pub fn is_permission_error(&self) -> bool {
        matches!(self, DirectoryError::AccessDenied { .. })
    }

    /// Stable error code recorded in account results.
    pub fn error_code(&self) -> &'static str {
        match self {
            DirectoryError::Throttled { .. } => "THROTTLED",
            DirectoryError::Timeout => "TIMEOUT",
            DirectoryError::Unavailable { .. } => "SERVICE_UNAVAILABLE",
            DirectoryError::CircuitOpen => "CIRCUIT_OPEN",
            DirectoryError::AccessDenied { .. } => "ACCESS_DENIED",
            DirectoryError::Validation { .. } => "VALIDATION_ERROR",
            DirectoryError::NotFound { .. } => "NOT_FOUND",
            DirectoryError::Conflict { .. } => "CONFLICT",
            DirectoryError::Provider { .. } => "PROVIDER_ERROR",
        }
    }
}

/// Result type for directory calls.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Access to the organization's accounts and their contact information.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// List one page of accounts. `None` requests the first page.
    async fn list_accounts(&self, page_token: Option<String>) -> DirectoryResult<AccountPage>;

    /// Read the current contact of `kind` on `account`, `None` if unset.
    async fn get_contact(
        &self,
        account: &AccountId,
        kind: ContactKind,
    ) -> DirectoryResult<Option<ContactPayload>>;

    /// Write `payload` as the contact of `kind` on `account`.
    async fn put_contact(
        &self,
        account: &AccountId,
        kind: ContactKind,
        payload: &ContactPayload,
    ) -> DirectoryResult<()>;
}

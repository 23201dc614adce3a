//! Sync operation model.
//!
//! A [`SyncOperation`] is the audit record of one propagation run. Its
//! status only moves forward along the lifecycle below and each target
//! account receives at most one [`AccountSyncResult`].
//!
//! ```text
//! PENDING ──► IN_PROGRESS ──► COMPLETED
//!    │              └───────► FAILED
//!    ├──────────────────────► COMPLETED   (no eligible targets)
//!    └──────────────────────► FAILED      (operation-level failure)
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::contact::{ContactKind, ContactPayload};
use crate::error::ValidationError;
use crate::ids::{AccountId, EventId, SyncId};

/// Lifecycle status of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SyncStatus {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::InProgress => "IN_PROGRESS",
            SyncStatus::Completed => "COMPLETED",
            SyncStatus::Failed => "FAILED",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (SyncStatus::Pending, SyncStatus::InProgress)
                | (SyncStatus::Pending, SyncStatus::Completed)
                | (SyncStatus::Pending, SyncStatus::Failed)
                | (SyncStatus::InProgress, SyncStatus::Completed)
                | (SyncStatus::InProgress, SyncStatus::Failed)
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(SyncStatus::Pending),
            "IN_PROGRESS" => Ok(SyncStatus::InProgress),
            "COMPLETED" => Ok(SyncStatus::Completed),
            "FAILED" => Ok(SyncStatus::Failed),
            _ => Err(ValidationError::invalid(
                "status",
                format!("unknown sync status: {s}"),
            )),
        }
    }
}

/// Outcome of propagating a contact to one target account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountSyncStatus {
    /// The target was updated.
    Success,
    /// The target could not be updated.
    Failed,
    /// The target already held the desired contact; nothing was written.
    Skipped,
}

impl AccountSyncStatus {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountSyncStatus::Success => "SUCCESS",
            AccountSyncStatus::Failed => "FAILED",
            AccountSyncStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for AccountSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountSyncStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SUCCESS" => Ok(AccountSyncStatus::Success),
            "FAILED" => Ok(AccountSyncStatus::Failed),
            "SKIPPED" => Ok(AccountSyncStatus::Skipped),
            _ => Err(ValidationError::invalid(
                "status",
                format!("unknown account sync status: {s}"),
            )),
        }
    }
}

/// Result of synchronizing one target account. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSyncResult {
    pub account_id: AccountId,
    pub status: AccountSyncStatus,
    pub attempted_at: DateTime<Utc>,
    /// Attempts made beyond the first.
    pub retry_count: u32,
    /// Stable error code when the result is a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Human-readable error detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AccountSyncResult {
    /// A successful update.
    #[must_use]
    pub fn success(account_id: AccountId, retry_count: u32) -> Self {
        Self {
            account_id,
            status: AccountSyncStatus::Success,
            attempted_at: Utc::now(),
            retry_count,
            error_kind: None,
            error_message: None,
        }
    }

    /// The target already matched; no write issued.
    #[must_use]
    pub fn skipped(account_id: AccountId) -> Self {
        Self {
            account_id,
            status: AccountSyncStatus::Skipped,
            attempted_at: Utc::now(),
            retry_count: 0,
            error_kind: None,
            error_message: None,
        }
    }

    /// A failed update.
    pub fn failed(
        account_id: AccountId,
        retry_count: u32,
        error_kind: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            status: AccountSyncStatus::Failed,
            attempted_at: Utc::now(),
            retry_count,
            error_kind: Some(error_kind.into()),
            error_message: Some(error_message.into()),
        }
    }

    /// Whether this result is a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == AccountSyncStatus::Failed
    }
}

/// One propagation run triggered by a qualifying change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub sync_id: SyncId,
    pub event_id: EventId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub initiating_principal: String,
    pub contact_kind: ContactKind,
    pub source_account_id: AccountId,
    /// Targets in enumeration order.
    pub target_account_ids: Vec<AccountId>,
    pub status: SyncStatus,
    pub results: BTreeMap<AccountId, AccountSyncResult>,
    /// Contact read from the source account, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_payload: Option<ContactPayload>,
    /// Why the whole operation failed before reaching any target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Retention hint for the backing store.
    pub expires_at: DateTime<Utc>,
}

impl SyncOperation {
    /// Create a new operation in `PENDING` with no targets yet.
    #[must_use]
    pub fn new(
        event_id: EventId,
        initiating_principal: impl Into<String>,
        contact_kind: ContactKind,
        source_account_id: AccountId,
        retention: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            sync_id: SyncId::new(),
            event_id,
            created_at: now,
            updated_at: now,
            initiating_principal: initiating_principal.into(),
            contact_kind,
            source_account_id,
            target_account_ids: Vec::new(),
            status: SyncStatus::Pending,
            results: BTreeMap::new(),
            contact_payload: None,
            failure_reason: None,
            expires_at: now + retention,
        }
    }

    /// Number of targets with a `FAILED` result.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.results.values().filter(|r| r.is_failure()).count()
    }

    /// Number of targets with the given result status.
    #[must_use]
    pub fn count_with_status(&self, status: AccountSyncStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }

    /// Targets that do not have a result yet, in enumeration order.
    #[must_use]
    pub fn pending_targets(&self) -> Vec<AccountId> {
        self.target_account_ids
            .iter()
            .filter(|id| !self.results.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Whether every target has a result.
    #[must_use]
    pub fn all_results_recorded(&self) -> bool {
        self.target_account_ids
            .iter()
            .all(|id| self.results.contains_key(id))
    }

    /// Terminal status implied by the recorded results.
    ///
    /// `COMPLETED` when every result is `SUCCESS` or `SKIPPED`, `FAILED`
    /// as soon as one result failed.
    #[must_use]
    pub fn aggregate_status(&self) -> SyncStatus {
        if self.results.values().any(AccountSyncResult::is_failure) {
            SyncStatus::Failed
        } else {
            SyncStatus::Completed
        }
    }

    /// Whether the operation failed before any target was processed.
    #[must_use]
    pub fn is_operation_level_failure(&self) -> bool {
        self.status == SyncStatus::Failed && self.target_account_ids.is_empty()
    }
}

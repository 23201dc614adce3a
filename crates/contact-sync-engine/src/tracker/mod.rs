//! Sync operation state tracking.
//!
//! The tracker is the audit record of every run. Results are written at most
//! once per `(sync_id, account_id)` and statuses only move forward, so a
//! stored operation can be trusted as history.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::InMemoryStateTracker;
#[cfg(feature = "postgres")]
pub use postgres::PgStateTracker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contact_sync_core::{
    AccountId, AccountSyncResult, AccountSyncStatus, ContactKind, ContactPayload, SyncId,
    SyncOperation, SyncStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{SyncError, SyncResult};

/// Filter for operation history queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncQuery {
    /// Only operations created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub status: Option<SyncStatus>,
    pub contact_kind: Option<ContactKind>,
    /// Maximum number of operations returned.
    pub limit: Option<usize>,
}

impl SyncQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub fn status(mut self, status: SyncStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn contact_kind(mut self, kind: ContactKind) -> Self {
        self.contact_kind = Some(kind);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `operation` passes the filters (limit aside).
    pub fn matches(&self, operation: &SyncOperation) -> bool {
        self.since.map_or(true, |since| operation.created_at >= since)
            && self.status.map_or(true, |s| operation.status == s)
            && self
                .contact_kind
                .map_or(true, |k| operation.contact_kind == k)
    }
}

/// Aggregate counts over operations created since a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub total_operations: u64,
    pub operations_by_status: HashMap<SyncStatus, u64>,
    pub total_results: u64,
    pub results_by_status: HashMap<AccountSyncStatus, u64>,
}

impl SyncStatistics {
    /// Fold one operation into the counts.
    pub fn add(&mut self, operation: &SyncOperation) {
        self.total_operations += 1;
        *self.operations_by_status.entry(operation.status).or_insert(0) += 1;
        for result in operation.results.values() {
            self.total_results += 1;
            *self.results_by_status.entry(result.status).or_insert(0) += 1;
        }
    }

    /// Number of operations with `status`.
    pub fn operations_with(&self, status: SyncStatus) -> u64 {
        self.operations_by_status.get(&status).copied().unwrap_or(0)
    }

    /// Number of account results with `status`.
    pub fn results_with(&self, status: AccountSyncStatus) -> u64 {
        self.results_by_status.get(&status).copied().unwrap_or(0)
    }

    /// Share of account results that did not fail, `None` without results.
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_results == 0 {
            return None;
        }
        let failed = self.results_with(AccountSyncStatus::Failed);
        Some((self.total_results - failed) as f64 / self.total_results as f64)
    }
}

/// Persistence for sync operations.
#[async_trait]
pub trait StateTracker: Send + Sync {
    /// Store a new operation. Fails with `DuplicateOperation` if the id exists.
    async fn create(&self, operation: &SyncOperation) -> SyncResult<()>;

    /// Fix the source payload and target list of a `PENDING` operation.
    async fn assign_targets(
        &self,
        sync_id: SyncId,
        payload: &ContactPayload,
        targets: &[AccountId],
    ) -> SyncResult<()>;

    /// Move the operation to `status`, returning the updated record.
    async fn update_status(
        &self,
        sync_id: SyncId,
        status: SyncStatus,
        failure_reason: Option<String>,
    ) -> SyncResult<SyncOperation>;

    /// Record the result for one target. Fails with `DuplicateResult` if one exists.
    async fn record_result(&self, sync_id: SyncId, result: AccountSyncResult) -> SyncResult<()>;

    /// Fetch one operation.
    async fn get(&self, sync_id: SyncId) -> SyncResult<Option<SyncOperation>>;

    /// Operations created at or after `since`, newest first.
    async fn list_recent(&self, since: DateTime<Utc>) -> SyncResult<Vec<SyncOperation>> {
        self.query(&SyncQuery::new().since(since)).await
    }

    /// Operations matching `query`, newest first.
    async fn query(&self, query: &SyncQuery) -> SyncResult<Vec<SyncOperation>>;

    /// Counts over operations created at or after `since`.
    async fn statistics(&self, since: DateTime<Utc>) -> SyncResult<SyncStatistics> {
        let mut stats = SyncStatistics::default();
        for operation in self.list_recent(since).await? {
            stats.add(&operation);
        }
        Ok(stats)
    }
}

/// Check that `operation` may move to `next`.
pub(crate) fn check_transition(operation: &SyncOperation, next: SyncStatus) -> SyncResult<()> {
    if !operation.status.can_transition_to(next) {
        return Err(SyncError::InvalidTransition {
            sync_id: operation.sync_id,
            from: operation.status,
            to: next,
        });
    }
    if next == SyncStatus::InProgress && operation.target_account_ids.is_empty() {
        return Err(SyncError::InvalidTransition {
            sync_id: operation.sync_id,
            from: operation.status,
            to: next,
        });
    }
    if next.is_terminal() {
        let missing = operation.pending_targets().len();
        if missing > 0 {
            return Err(SyncError::IncompleteResults {
                sync_id: operation.sync_id,
                missing,
            });
        }
    }
    Ok(())
}

/// Check that `account` may receive a result in `operation`.
pub(crate) fn check_result(operation: &SyncOperation, account: &AccountId) -> SyncResult<()> {
    if !operation.target_account_ids.contains(account) {
        return Err(SyncError::UnknownTarget {
            sync_id: operation.sync_id,
            account_id: account.clone(),
        });
    }
    if operation.results.contains_key(account) {
        return Err(SyncError::DuplicateResult {
            sync_id: operation.sync_id,
            account_id: account.clone(),
        });
    }
    if operation.status != SyncStatus::InProgress {
        return Err(SyncError::NotInProgress {
            sync_id: operation.sync_id,
            status: operation.status,
        });
    }
    Ok(())
}

/// Check that targets may still be assigned.
pub(crate) fn check_assignable(operation: &SyncOperation) -> SyncResult<()> {
    if operation.status != SyncStatus::Pending {
        return Err(SyncError::TargetsFrozen {
            sync_id: operation.sync_id,
            status: operation.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use contact_sync_core::EventId;

    fn operation(status: SyncStatus, kind: ContactKind) -> SyncOperation {
        let mut op = SyncOperation::new(
            EventId::new("evt").unwrap(),
            "admin",
            kind,
            AccountId::new("000000000000").unwrap(),
            Duration::days(90),
        );
        op.status = status;
        op
    }

    #[test]
    fn test_query_matches() {
        let op = operation(SyncStatus::Failed, ContactKind::Billing);
        assert!(SyncQuery::new().matches(&op));
        assert!(SyncQuery::new().status(SyncStatus::Failed).matches(&op));
        assert!(!SyncQuery::new().status(SyncStatus::Completed).matches(&op));
        assert!(!SyncQuery::new()
            .contact_kind(ContactKind::Security)
            .matches(&op));
        assert!(!SyncQuery::new()
            .since(op.created_at + Duration::seconds(1))
            .matches(&op));
    }

    #[test]
    fn test_statistics_add() {
        let mut op = operation(SyncStatus::Failed, ContactKind::Billing);
        let a = AccountId::new("111111111111").unwrap();
        let b = AccountId::new("222222222222").unwrap();
        op.target_account_ids = vec![a.clone(), b.clone()];
        op.results
            .insert(a.clone(), AccountSyncResult::success(a, 0));
        op.results
            .insert(b.clone(), AccountSyncResult::failed(b, 2, "THROTTLED", "x"));

        let mut stats = SyncStatistics::default();
        stats.add(&op);
        stats.add(&operation(SyncStatus::Completed, ContactKind::Primary));

        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.operations_with(SyncStatus::Failed), 1);
        assert_eq!(stats.results_with(AccountSyncStatus::Failed), 1);
        assert_eq!(stats.success_rate(), Some(0.5));
    }

    #[test]
    fn test_in_progress_requires_targets() {
        let op = operation(SyncStatus::Pending, ContactKind::Billing);
        assert!(check_transition(&op, SyncStatus::InProgress).is_err());
        assert!(check_transition(&op, SyncStatus::Completed).is_ok());
    }
}

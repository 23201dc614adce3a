//! In-memory state tracker.

use async_trait::async_trait;
use chrono::Utc;
use contact_sync_core::{
    AccountId, AccountSyncResult, ContactPayload, SyncId, SyncOperation, SyncStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{check_assignable, check_result, check_transition, StateTracker, SyncQuery};
use crate::error::{SyncError, SyncResult};

/// Tracker keeping operations in process memory.
///
/// Each operation sits behind its own lock, so concurrent result writes for
/// different operations never contend and writes within one operation are
/// serialized per record.
#[derive(Debug, Default)]
pub struct InMemoryStateTracker {
    operations: RwLock<HashMap<SyncId, Arc<Mutex<SyncOperation>>>>,
}

impl InMemoryStateTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored operations.
    pub async fn len(&self) -> usize {
        self.operations.read().await.len()
    }

    /// Whether no operation is stored.
    pub async fn is_empty(&self) -> bool {
        self.operations.read().await.is_empty()
    }

    async fn slot(&self, sync_id: SyncId) -> SyncResult<Arc<Mutex<SyncOperation>>> {
        self.operations
            .read()
            .await
            .get(&sync_id)
            .cloned()
            .ok_or(SyncError::NotFound { sync_id })
    }

    async fn snapshot(&self) -> Vec<SyncOperation> {
        let slots: Vec<_> = self.operations.read().await.values().cloned().collect();
        let mut operations = Vec::with_capacity(slots.len());
        for slot in slots {
            operations.push(slot.lock().await.clone());
        }
        operations
    }
}

#[async_trait]
impl StateTracker for InMemoryStateTracker {
    async fn create(&self, operation: &SyncOperation) -> SyncResult<()> {
        let mut operations = self.operations.write().await;
        if operations.contains_key(&operation.sync_id) {
            return Err(SyncError::DuplicateOperation {
                sync_id: operation.sync_id,
            });
        }
        operations.insert(operation.sync_id, Arc::new(Mutex::new(operation.clone())));
        debug!(sync_id = %operation.sync_id, "Sync operation created");
        Ok(())
    }

    async fn assign_targets(
        &self,
        sync_id: SyncId,
        payload: &ContactPayload,
        targets: &[AccountId],
    ) -> SyncResult<()> {
        let slot = self.slot(sync_id).await?;
        let mut operation = slot.lock().await;
        check_assignable(&operation)?;

        operation.contact_payload = Some(payload.clone());
        operation.target_account_ids = targets.to_vec();
        operation.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status(
        &self,
        sync_id: SyncId,
        status: SyncStatus,
        failure_reason: Option<String>,
    ) -> SyncResult<SyncOperation> {
        let slot = self.slot(sync_id).await?;
        let mut operation = slot.lock().await;
        check_transition(&operation, status)?;

        operation.status = status;
        if failure_reason.is_some() {
            operation.failure_reason = failure_reason;
        }
        operation.updated_at = Utc::now();
        Ok(operation.clone())
    }

    async fn record_result(&self, sync_id: SyncId, result: AccountSyncResult) -> SyncResult<()> {
        let slot = self.slot(sync_id).await?;
        let mut operation = slot.lock().await;
        check_result(&operation, &result.account_id)?;

        operation.updated_at = Utc::now();
        operation.results.insert(result.account_id.clone(), result);
        Ok(())
    }

    async fn get(&self, sync_id: SyncId) -> SyncResult<Option<SyncOperation>> {
        let slot = self.operations.read().await.get(&sync_id).cloned();
        match slot {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn query(&self, query: &SyncQuery) -> SyncResult<Vec<SyncOperation>> {
        let mut operations: Vec<_> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|op| query.matches(op))
            .collect();
        operations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            operations.truncate(limit);
        }
        Ok(operations)
    }
}

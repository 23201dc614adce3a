//! Sync orchestration.
//!
//! One accepted change event becomes one [`SyncOperation`]. The orchestrator
//! persists it as `PENDING` before anything else happens, reads the source
//! contact, enumerates targets, fans the targets out to the
//! [`AccountProcessor`] under a concurrency cap and finally writes the
//! terminal status and escalates.

use contact_sync_core::{
    AccountId, AccountSyncResult, ContactPayload, SyncId, SyncOperation, SyncStatus,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, instrument, warn};

use crate::config::{Configuration, ConfigurationSource, EngineSettings};
use crate::directory::AccountDirectory;
use crate::enumerator::TargetEnumerator;
use crate::error::{SyncError, SyncResult};
use crate::event::ContactChangeEvent;
use crate::notification::NotificationEscalator;
use crate::processor::AccountProcessor;
use crate::resilience::backoff_delay;
use crate::tracker::StateTracker;

/// Error kind recorded for a target whose processing task panicked.
pub const PROCESSOR_ABORTED: &str = "PROCESSOR_ABORTED";

/// A running sync operation.
#[derive(Debug)]
pub struct SyncHandle {
    sync_id: SyncId,
    handle: JoinHandle<SyncResult<SyncOperation>>,
}

impl SyncHandle {
    /// Id of the operation, already persisted as `PENDING`.
    #[must_use]
    pub fn sync_id(&self) -> SyncId {
        self.sync_id
    }

    /// Wait for the operation to reach its final state.
    pub async fn wait(self) -> SyncResult<SyncOperation> {
        self.handle
            .await
            .map_err(|e| SyncError::internal(format!("sync task {} aborted: {e}", self.sync_id)))?
    }
}

/// Drives sync operations from event to terminal status.
#[derive(Clone)]
pub struct SyncOrchestrator {
    settings: Arc<EngineSettings>,
    directory: Arc<dyn AccountDirectory>,
    tracker: Arc<dyn StateTracker>,
    config: Arc<dyn ConfigurationSource>,
    enumerator: TargetEnumerator,
    processor: AccountProcessor,
    escalator: NotificationEscalator,
}

impl SyncOrchestrator {
    /// Wire an orchestrator. The processor uses exact comparison and no
    /// circuit breaker; see [`with_processor`](Self::with_processor).
    pub fn new(
        settings: EngineSettings,
        directory: Arc<dyn AccountDirectory>,
        tracker: Arc<dyn StateTracker>,
        config: Arc<dyn ConfigurationSource>,
        escalator: NotificationEscalator,
    ) -> Self {
        let processor = AccountProcessor::new(directory.clone(), settings.account_deadline);
        Self {
            settings: Arc::new(settings),
            enumerator: TargetEnumerator::new(directory.clone()),
            directory,
            tracker,
            config,
            processor,
            escalator,
        }
    }

    /// Replace the per-account processor.
    #[must_use]
    pub fn with_processor(mut self, processor: AccountProcessor) -> Self {
        self.processor = processor;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Start a sync for `event`.
    ///
    /// Returns `None` when the contact kind is not enabled. Otherwise the
    /// operation is persisted as `PENDING` before this returns and the rest
    /// runs in the background.
    #[instrument(skip_all, fields(event_id = %event.event_id, contact_kind = %event.contact_kind))]
    pub async fn run(&self, event: ContactChangeEvent) -> SyncResult<Option<SyncHandle>> {
        let snapshot = self.config.read().await?;
        if !snapshot.is_kind_enabled(event.contact_kind) {
            info!("Contact kind not enabled, ignoring event");
            return Ok(None);
        }

        let operation = SyncOperation::new(
            event.event_id.clone(),
            event.initiating_principal.clone(),
            event.contact_kind,
            event.source_account_id.clone(),
            self.settings.retention(),
        );
        self.tracker.create(&operation).await?;

        let sync_id = operation.sync_id;
        info!(%sync_id, "Sync operation created");

        let this = self.clone();
        let handle = tokio::spawn(async move { this.drive(operation, snapshot).await });
        Ok(Some(SyncHandle { sync_id, handle }))
    }

    /// Run a sync for `event` to completion.
    pub async fn execute(&self, event: ContactChangeEvent) -> SyncResult<Option<SyncOperation>> {
        match self.run(event).await? {
            Some(handle) => handle.wait().await.map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(sync_id = %operation.sync_id))]
    async fn drive(
        &self,
        operation: SyncOperation,
        snapshot: Arc<Configuration>,
    ) -> SyncResult<SyncOperation> {
        let sync_id = operation.sync_id;

        let payload = match self.source_contact(&operation, &snapshot).await {
            Ok(payload) => payload,
            Err(reason) => return self.fail(sync_id, reason, &snapshot).await,
        };
        let targets = match self
            .enumerator
            .enumerate(&snapshot, &operation.source_account_id)
            .await
        {
            Ok(targets) => targets,
            Err(e) => return self.fail(sync_id, e.to_string(), &snapshot).await,
        };

        self.tracker
            .assign_targets(sync_id, &payload, &targets)
            .await?;

        if targets.is_empty() {
            info!("No eligible targets");
            let done = self
                .tracker
                .update_status(sync_id, SyncStatus::Completed, None)
                .await?;
            self.escalator
                .escalate(&done, snapshot.notification_policy())
                .await;
            return Ok(done);
        }

        self.tracker
            .update_status(sync_id, SyncStatus::InProgress, None)
            .await?;
        info!(targets = targets.len(), "Propagating contact");

        self.fan_out(&operation, Arc::new(payload), targets, &snapshot)
            .await?;

        let recorded = self
            .tracker
            .get(sync_id)
            .await?
            .ok_or(SyncError::NotFound { sync_id })?;
        let status = recorded.aggregate_status();
        let done = self.tracker.update_status(sync_id, status, None).await?;

        info!(
            %status,
            failed = done.failed_count(),
            total = done.target_account_ids.len(),
            "Sync operation finished"
        );
        self.escalator
            .escalate(&done, snapshot.notification_policy())
            .await;
        Ok(done)
    }

    /// Process every target, at most `max_concurrency` at a time. Each task
    /// records its own result; the first tracker error is returned after all
    /// tasks have finished.
    async fn fan_out(
        &self,
        operation: &SyncOperation,
        payload: Arc<ContactPayload>,
        targets: Vec<AccountId>,
        snapshot: &Arc<Configuration>,
    ) -> SyncResult<()> {
        let sync_id = operation.sync_id;
        let kind = operation.contact_kind;
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let mut tasks = JoinSet::new();

        for target in targets {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| SyncError::internal(format!("concurrency limiter closed: {e}")))?;
            let processor = self.processor.clone();
            let tracker = self.tracker.clone();
            let payload = payload.clone();
            let snapshot = snapshot.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let account = target.clone();
                let processed = tokio::spawn(async move {
                    processor
                        .process(&account, kind, &payload, snapshot.retry_policy())
                        .await
                })
                .await;

                let result = match processed {
                    Ok(result) => result,
                    Err(e) => {
                        error!(account_id = %target, error = %e, "Account processing aborted");
                        AccountSyncResult::failed(target, 0, PROCESSOR_ABORTED, e.to_string())
                    }
                };
                tracker.record_result(sync_id, result).await
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| SyncError::internal(format!("result task aborted: {e}")))
                .and_then(|recorded| recorded);
            if let Err(e) = outcome {
                error!(error = %e, code = e.error_code(), "Failed to record account result");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Read the contact to propagate from the source account, retrying
    /// transient directory errors, and validate it before any target sees it.
    /// The error is the operation's failure reason.
    async fn source_contact(
        &self,
        operation: &SyncOperation,
        snapshot: &Configuration,
    ) -> Result<ContactPayload, String> {
        let policy = snapshot.retry_policy();
        let source = &operation.source_account_id;
        let kind = operation.contact_kind;
        let mut attempt = 1;

        loop {
            match self.directory.get_contact(source, kind).await {
                Ok(Some(payload)) => {
                    return payload
                        .validate()
                        .map(|()| payload)
                        .map_err(|e| format!("source {kind} contact is invalid: {e}"))
                }
                Ok(None) => return Err(format!("source account {source} has no {kind} contact")),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let delay = backoff_delay(policy, attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Reading source contact failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(format!(
                        "reading source contact failed after {attempt} attempt(s): {e}"
                    ))
                }
            }
        }
    }

    async fn fail(
        &self,
        sync_id: SyncId,
        reason: String,
        snapshot: &Configuration,
    ) -> SyncResult<SyncOperation> {
        error!(%reason, "Sync operation failed before reaching any target");
        let failed = self
            .tracker
            .update_status(sync_id, SyncStatus::Failed, Some(reason))
            .await?;
        self.escalator
            .escalate(&failed, snapshot.notification_policy())
            .await;
        Ok(failed)
    }
}

//! Engine facade: event intake plus the read-side query surface.

use chrono::{DateTime, Utc};
use contact_sync_core::{EventId, SyncId, SyncOperation};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::comparator::ContactComparator;
use crate::config::{
    Configuration, ConfigurationSource, EngineSettings, InMemoryConfigurationSource,
    RawConfiguration,
};
use crate::directory::AccountDirectory;
use crate::error::{SyncError, SyncResult};
use crate::event::{unwrap_feed_payload, ChangeEventFilter, ContactChangeEvent};
use crate::notification::{ChannelRegistry, NotificationEscalator};
use crate::orchestrator::{SyncHandle, SyncOrchestrator};
use crate::processor::AccountProcessor;
use crate::resilience::CircuitBreaker;
use crate::tracker::{InMemoryStateTracker, StateTracker, SyncQuery, SyncStatistics};

/// A record whose operation could not be started.
#[derive(Debug)]
pub struct IntakeFailure {
    pub event_id: EventId,
    pub error: SyncError,
}

/// Outcome of one feed payload.
#[derive(Debug, Default)]
pub struct IntakeReport {
    /// Operations started, in record order.
    pub handles: Vec<SyncHandle>,
    pub failures: Vec<IntakeFailure>,
}

impl IntakeReport {
    /// Whether every qualifying record started its operation.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Contact sync engine.
///
/// Feed payloads go in through [`handle_payload`](Self::handle_payload);
/// the audit trail comes out through the query methods.
pub struct SyncEngine {
    filter: ChangeEventFilter,
    orchestrator: SyncOrchestrator,
    tracker: Arc<dyn StateTracker>,
    config: Arc<dyn ConfigurationSource>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("filter", &self.filter)
            .field("settings", self.orchestrator.settings())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Start building an engine for the given settings.
    #[must_use]
    pub fn builder(settings: EngineSettings) -> SyncEngineBuilder {
        SyncEngineBuilder::new(settings)
    }

    /// Process one raw feed payload.
    ///
    /// Each qualifying record starts one operation. Records are independent:
    /// a record whose operation cannot be started is reported in
    /// [`IntakeReport::failures`] and the rest of the batch still runs. Its
    /// event id is released from the dedup window so a redelivery is
    /// accepted again.
    #[instrument(skip_all)]
    pub async fn handle_payload(&self, payload: &Value) -> IntakeReport {
        let records = unwrap_feed_payload(payload);
        debug!(records = records.len(), "Received feed payload");

        let mut report = IntakeReport::default();
        for record in &records {
            let Some(event) = self.filter.filter(record) else {
                continue;
            };
            let event_id = event.event_id.clone();
            match self.orchestrator.run(event).await {
                Ok(Some(handle)) => report.handles.push(handle),
                Ok(None) => {}
                Err(error) => {
                    self.filter.forget(&event_id);
                    error!(
                        %event_id,
                        error = %error,
                        code = error.error_code(),
                        "Failed to start sync operation"
                    );
                    report.failures.push(IntakeFailure { event_id, error });
                }
            }
        }
        report
    }

    /// Start an operation for an event that already passed filtering.
    pub async fn handle_event(&self, event: ContactChangeEvent) -> SyncResult<Option<SyncHandle>> {
        self.orchestrator.run(event).await
    }

    /// The event filter, for callers that classify records themselves.
    #[must_use]
    pub fn filter(&self) -> &ChangeEventFilter {
        &self.filter
    }

    pub async fn get(&self, sync_id: SyncId) -> SyncResult<Option<SyncOperation>> {
        self.tracker.get(sync_id).await
    }

    /// Operations created at or after `since`, newest first.
    pub async fn list_recent(&self, since: DateTime<Utc>) -> SyncResult<Vec<SyncOperation>> {
        self.tracker.list_recent(since).await
    }

    pub async fn query(&self, query: &SyncQuery) -> SyncResult<Vec<SyncOperation>> {
        self.tracker.query(query).await
    }

    pub async fn statistics(&self, since: DateTime<Utc>) -> SyncResult<SyncStatistics> {
        self.tracker.statistics(since).await
    }

    /// Current configuration snapshot.
    pub async fn configuration(&self) -> SyncResult<Arc<Configuration>> {
        self.config.read().await
    }

    /// Validate and store a new configuration. Running operations keep the
    /// snapshot they started with.
    pub async fn update_configuration(&self, raw: RawConfiguration) -> SyncResult<u64> {
        self.config.write_raw(raw).await
    }
}

/// Builder for [`SyncEngine`].
///
/// Only the directory is required. The tracker and configuration source
/// default to in-memory implementations and no notification channel is
/// registered.
pub struct SyncEngineBuilder {
    settings: EngineSettings,
    directory: Option<Arc<dyn AccountDirectory>>,
    tracker: Option<Arc<dyn StateTracker>>,
    config: Option<Arc<dyn ConfigurationSource>>,
    channels: ChannelRegistry,
    comparator: Option<Arc<dyn ContactComparator>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl SyncEngineBuilder {
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            directory: None,
            tracker: None,
            config: None,
            channels: ChannelRegistry::new(),
            comparator: None,
            circuit_breaker: None,
        }
    }

    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn AccountDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    #[must_use]
    pub fn tracker(mut self, tracker: Arc<dyn StateTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    #[must_use]
    pub fn configuration_source(mut self, config: Arc<dyn ConfigurationSource>) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn channels(mut self, channels: ChannelRegistry) -> Self {
        self.channels = channels;
        self
    }

    #[must_use]
    pub fn comparator(mut self, comparator: Arc<dyn ContactComparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    #[must_use]
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn build(self) -> SyncResult<SyncEngine> {
        let directory = self
            .directory
            .ok_or_else(|| SyncError::configuration("an account directory is required"))?;
        let tracker = self
            .tracker
            .unwrap_or_else(|| Arc::new(InMemoryStateTracker::new()));
        let config = self
            .config
            .unwrap_or_else(|| Arc::new(InMemoryConfigurationSource::default()));

        let mut processor = AccountProcessor::new(directory.clone(), self.settings.account_deadline);
        if let Some(comparator) = self.comparator {
            processor = processor.with_comparator(comparator);
        }
        if let Some(breaker) = self.circuit_breaker {
            processor = processor.with_circuit_breaker(breaker);
        }

        let filter = ChangeEventFilter::from_settings(&self.settings);
        let orchestrator = SyncOrchestrator::new(
            self.settings,
            directory,
            tracker.clone(),
            config.clone(),
            NotificationEscalator::new(self.channels),
        )
        .with_processor(processor);

        Ok(SyncEngine {
            filter,
            orchestrator,
            tracker,
            config,
        })
    }
}

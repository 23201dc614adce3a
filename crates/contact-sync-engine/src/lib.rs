//! # contact-sync-engine
//!
//! Propagates contact changes made on a source account to every dependent
//! account of the organization.
//!
//! ## Pipeline
//!
//! - [`event`]: turns feed payloads into [`ContactChangeEvent`]s, dropping the
//!   engine's own writes, foreign accounts and replays
//! - [`enumerator`]: lists active, non-excluded target accounts
//! - [`processor`]: brings one target in line with the source, with retries
//! - [`orchestrator`]: fans targets out under a concurrency cap
//! - [`tracker`]: append-only audit record of every operation
//! - [`notification`]: failure and success escalation with fallback delivery
//!
//! ## Example
//!
//! ```ignore
//! use contact_sync_engine::prelude::*;
//!
//! let settings = EngineSettings::from_env()?;
//! let engine = SyncEngine::builder(settings)
//!     .directory(directory)
//!     .channels(ChannelRegistry::new().with_channel("primary", Arc::new(TracingChannel)))
//!     .build()?;
//!
//! for handle in engine.handle_payload(&payload).await.handles {
//!     let operation = handle.wait().await?;
//!     println!("{} -> {}", operation.sync_id, operation.status);
//! }
//! ```

pub mod comparator;
pub mod config;
pub mod directory;
pub mod engine;
pub mod enumerator;
pub mod error;
pub mod event;
pub mod notification;
pub mod orchestrator;
pub mod processor;
pub mod resilience;
pub mod telemetry;
pub mod tracker;

pub use comparator::{ContactComparator, ExactComparator, PrimaryField, PrimaryNameComparator};
pub use config::{
    ChannelNames, ConfigError, Configuration, ConfigurationBuilder, ConfigurationSource,
    EngineSettings, InMemoryConfigurationSource, NotificationPolicy, RawConfiguration,
    RetryPolicy,
};
pub use directory::{
    AccountDirectory, AccountPage, AccountStatus, DirectoryAccount, DirectoryError,
    DirectoryResult,
};
pub use engine::{IntakeFailure, IntakeReport, SyncEngine, SyncEngineBuilder};
pub use enumerator::TargetEnumerator;
pub use error::{SyncError, SyncResult};
pub use event::{ChangeEventFilter, ContactChangeEvent, FilterDecision, RejectReason};
pub use notification::{
    ChannelRegistry, DeliveryOutcome, DeliveryReport, Notification, NotificationChannel,
    NotificationEscalator, NotificationKind, Priority, TracingChannel, WebhookChannel,
    WebhookChannelConfig,
};
pub use orchestrator::{SyncHandle, SyncOrchestrator};
pub use processor::AccountProcessor;
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use telemetry::{init_tracing, LogFormat};
pub use tracker::{InMemoryStateTracker, StateTracker, SyncQuery, SyncStatistics};

#[cfg(feature = "postgres")]
pub use config::PgConfigurationSource;
#[cfg(feature = "postgres")]
pub use tracker::PgStateTracker;

pub use contact_sync_core::{
    AccountId, AccountSyncResult, AccountSyncStatus, AlternateContact, ContactKind,
    ContactPayload, EventId, PrimaryContact, SyncId, SyncOperation, SyncStatus,
};

/// Prelude for wiring an engine.
pub mod prelude {
    pub use crate::{
        AccountDirectory, ChannelRegistry, Configuration, ContactKind, EngineSettings,
        NotificationChannel, StateTracker, SyncEngine, SyncError, SyncResult, TracingChannel,
    };
    pub use std::sync::Arc;
}

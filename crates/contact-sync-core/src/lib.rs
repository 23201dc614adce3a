//! # contact-sync-core
//!
//! Shared identifiers and data model for contact synchronization.
//!
//! - [`ids`]: newtype identifiers ([`SyncId`], [`AccountId`], [`EventId`])
//! - [`contact`]: contact kinds and payloads carried source-to-target
//! - [`sync`]: the sync operation audit record and its lifecycle

pub mod contact;
pub mod error;
pub mod ids;
pub mod sync;

pub use contact::{AlternateContact, ContactKind, ContactPayload, PrimaryContact};
pub use error::ValidationError;
pub use ids::{AccountId, EventId, NotificationId, ParseIdError, SyncId};
pub use sync::{AccountSyncResult, AccountSyncStatus, SyncOperation, SyncStatus};

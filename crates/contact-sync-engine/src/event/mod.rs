//! Change event ingestion.
//!
//! Raw audit-trail payloads arrive from the event feed. The [`parser`] turns
//! them into candidate records and the [`filter`] decides which of them are
//! qualifying [`ContactChangeEvent`]s.

pub mod filter;
pub mod parser;

pub use filter::{ChangeEventFilter, FilterDecision, RejectReason};
pub use parser::unwrap_feed_payload;

use chrono::{DateTime, Utc};
use contact_sync_core::{AccountId, ContactKind, EventId};
use serde::{Deserialize, Serialize};

/// Event name for a change to the primary contact.
pub const PUT_CONTACT_INFORMATION: &str = "PutContactInformation";

/// Event name for a change to an alternate contact.
pub const PUT_ALTERNATE_CONTACT: &str = "PutAlternateContact";

/// Original request details kept alongside an accepted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeContext {
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    pub request_parameters: serde_json::Value,
}

/// A qualifying contact change on the source account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactChangeEvent {
    pub event_id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub initiating_principal: String,
    pub contact_kind: ContactKind,
    pub source_account_id: AccountId,
    pub raw_change_context: RawChangeContext,
}

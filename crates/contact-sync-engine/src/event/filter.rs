//! Change event filter.
//!
//! Accepts only contact mutations made directly on the source account, at
//! most once per event id within the dedup window.

use contact_sync_core::{AccountId, ContactKind, EventId};
use moka::sync::Cache;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::parser::{
    alternate_kind, check_required_fields, extract_principal, parse_event_time, string_field,
    targets_member_account,
};
use super::{ContactChangeEvent, RawChangeContext, PUT_ALTERNATE_CONTACT, PUT_CONTACT_INFORMATION};
use crate::config::EngineSettings;
use crate::error::{SyncError, SyncResult};

/// Why a raw payload did not produce an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Required fields missing or unparseable.
    Malformed { message: String },
    /// The event is not a contact mutation.
    NotContactMutation { event_name: String },
    /// The change addressed a member account (including the engine's own writes).
    TargetedChange { account_id: String },
    /// The change happened on an account other than the source.
    ForeignAccount { recipient_account_id: String },
    /// The event id was already accepted within the dedup window.
    Duplicate { event_id: EventId },
}

/// Outcome of evaluating one raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    Accept(ContactChangeEvent),
    Reject(RejectReason),
}

impl FilterDecision {
    /// The accepted event, if any.
    pub fn into_event(self) -> Option<ContactChangeEvent> {
        match self {
            FilterDecision::Accept(event) => Some(event),
            FilterDecision::Reject(_) => None,
        }
    }
}

/// Turns raw audit-trail records into qualifying change events.
pub struct ChangeEventFilter {
    source_account: AccountId,
    seen: Cache<EventId, ()>,
}

impl std::fmt::Debug for ChangeEventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeEventFilter")
            .field("source_account", &self.source_account)
            .field("seen", &self.seen.entry_count())
            .finish()
    }
}

impl ChangeEventFilter {
    /// Create a filter for `source_account` with a bounded dedup window.
    #[must_use]
    pub fn new(source_account: AccountId, dedup_capacity: u64, dedup_ttl: Duration) -> Self {
        Self {
            source_account,
            seen: Cache::builder()
                .max_capacity(dedup_capacity)
                .time_to_live(dedup_ttl)
                .build(),
        }
    }

    /// Create a filter from engine settings.
    #[must_use]
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(
            settings.source_account.clone(),
            settings.dedup_capacity,
            settings.dedup_ttl,
        )
    }

    /// Return the event if the record qualifies.
    pub fn filter(&self, raw: &Value) -> Option<ContactChangeEvent> {
        self.evaluate(raw).into_event()
    }

    /// Evaluate a record, exposing why it was rejected.
    pub fn evaluate(&self, raw: &Value) -> FilterDecision {
        let event = match self.classify(raw) {
            Ok(Ok(event)) => event,
            Ok(Err(reason)) => {
                debug!(?reason, "Change event rejected");
                return FilterDecision::Reject(reason);
            }
            Err(e) => {
                warn!(error = %e, "Discarding malformed change event");
                return FilterDecision::Reject(RejectReason::Malformed {
                    message: e.to_string(),
                });
            }
        };

        // Atomic check-and-insert; only the first caller sees a fresh entry.
        let entry = self.seen.entry(event.event_id.clone()).or_insert(());
        if !entry.is_fresh() {
            debug!(event_id = %event.event_id, "Duplicate change event dropped");
            return FilterDecision::Reject(RejectReason::Duplicate {
                event_id: event.event_id,
            });
        }

        info!(
            event_id = %event.event_id,
            contact_kind = %event.contact_kind,
            principal = %event.initiating_principal,
            "Accepted contact change event"
        );
        FilterDecision::Accept(event)
    }

    /// Drop `event_id` from the dedup window so the next delivery is accepted.
    pub fn forget(&self, event_id: &EventId) {
        self.seen.invalidate(event_id);
    }

    fn classify(&self, raw: &Value) -> SyncResult<Result<ContactChangeEvent, RejectReason>> {
        check_required_fields(raw)?;

        let event_name = string_field(raw, "eventName")?;
        if event_name != PUT_CONTACT_INFORMATION && event_name != PUT_ALTERNATE_CONTACT {
            return Ok(Err(RejectReason::NotContactMutation {
                event_name: event_name.to_string(),
            }));
        }

        let request_parameters = raw.get("requestParameters").cloned().unwrap_or(Value::Null);
        if let Some(account_id) = targets_member_account(&request_parameters) {
            return Ok(Err(RejectReason::TargetedChange { account_id }));
        }

        let recipient = string_field(raw, "recipientAccountId")?;
        if recipient != self.source_account.as_str() {
            return Ok(Err(RejectReason::ForeignAccount {
                recipient_account_id: recipient.to_string(),
            }));
        }

        let event_id = EventId::new(string_field(raw, "eventID")?)?;
        let occurred_at = parse_event_time(string_field(raw, "eventTime")?)?;
        let initiating_principal = raw
            .get("userIdentity")
            .map(extract_principal)
            .ok_or_else(|| SyncError::malformed("missing userIdentity"))?;

        let contact_kind = if event_name == PUT_CONTACT_INFORMATION {
            ContactKind::Primary
        } else {
            alternate_kind(&request_parameters)?
        };

        let event_source = raw
            .get("eventSource")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Ok(ContactChangeEvent {
            event_id,
            occurred_at,
            initiating_principal,
            contact_kind,
            source_account_id: self.source_account.clone(),
            raw_change_context: RawChangeContext {
                event_name: event_name.to_string(),
                event_source,
                request_parameters,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SOURCE: &str = "000000000000";

    fn filter() -> ChangeEventFilter {
        ChangeEventFilter::new(
            AccountId::new(SOURCE).unwrap(),
            100,
            Duration::from_secs(60),
        )
    }

    fn alternate_record(event_id: &str) -> Value {
        json!({
            "eventID": event_id,
            "eventName": "PutAlternateContact",
            "eventTime": "2024-05-01T10:00:00Z",
            "eventSource": "account.amazonaws.com",
            "userIdentity": {"arn": "arn:aws:iam::000000000000:user/admin"},
            "recipientAccountId": SOURCE,
            "requestParameters": {"alternateContactType": "BILLING", "emailAddress": "***"}
        })
    }

    #[test]
    fn test_accepts_alternate_contact_change() {
        let event = filter().filter(&alternate_record("evt-1")).unwrap();
        assert_eq!(event.contact_kind, ContactKind::Billing);
        assert_eq!(event.source_account_id.as_str(), SOURCE);
        assert_eq!(
            event.initiating_principal,
            "arn:aws:iam::000000000000:user/admin"
        );
        assert_eq!(
            event.raw_change_context.event_source.as_deref(),
            Some("account.amazonaws.com")
        );
    }

    #[test]
    fn test_primary_contact_change() {
        let mut record = alternate_record("evt-1");
        record["eventName"] = json!("PutContactInformation");
        record["requestParameters"] = json!({"contactInformation": {"fullName": "***"}});
        let event = filter().filter(&record).unwrap();
        assert_eq!(event.contact_kind, ContactKind::Primary);
    }

    #[test]
    fn test_rejects_targeted_change() {
        let mut record = alternate_record("evt-1");
        record["requestParameters"]["accountId"] = json!("111111111111");
        assert_eq!(
            filter().evaluate(&record),
            FilterDecision::Reject(RejectReason::TargetedChange {
                account_id: "111111111111".to_string()
            })
        );
    }

    #[test]
    fn test_rejects_foreign_account() {
        let mut record = alternate_record("evt-1");
        record["recipientAccountId"] = json!("999999999999");
        assert!(matches!(
            filter().evaluate(&record),
            FilterDecision::Reject(RejectReason::ForeignAccount { .. })
        ));
    }

    #[test]
    fn test_rejects_other_events() {
        let mut record = alternate_record("evt-1");
        record["eventName"] = json!("GetAlternateContact");
        assert!(matches!(
            filter().evaluate(&record),
            FilterDecision::Reject(RejectReason::NotContactMutation { .. })
        ));
    }

    #[test]
    fn test_malformed_records() {
        let f = filter();

        let mut missing = alternate_record("evt-1");
        missing.as_object_mut().unwrap().remove("userIdentity");
        assert!(matches!(
            f.evaluate(&missing),
            FilterDecision::Reject(RejectReason::Malformed { .. })
        ));

        let mut bad_time = alternate_record("evt-2");
        bad_time["eventTime"] = json!("not a time");
        assert!(matches!(
            f.evaluate(&bad_time),
            FilterDecision::Reject(RejectReason::Malformed { .. })
        ));

        let mut bad_kind = alternate_record("evt-3");
        bad_kind["requestParameters"] = json!({"alternateContactType": "FAX"});
        assert!(matches!(
            f.evaluate(&bad_kind),
            FilterDecision::Reject(RejectReason::Malformed { .. })
        ));
    }

    #[test]
    fn test_duplicate_event_ids_accepted_once() {
        let f = filter();
        assert!(f.filter(&alternate_record("evt-1")).is_some());
        assert_eq!(
            f.evaluate(&alternate_record("evt-1")),
            FilterDecision::Reject(RejectReason::Duplicate {
                event_id: EventId::new("evt-1").unwrap()
            })
        );
        assert!(f.filter(&alternate_record("evt-2")).is_some());
    }

    #[test]
    fn test_rejected_records_do_not_consume_dedup_slot() {
        let f = filter();
        let mut foreign = alternate_record("evt-1");
        foreign["recipientAccountId"] = json!("999999999999");
        assert!(f.filter(&foreign).is_none());
        assert!(f.filter(&alternate_record("evt-1")).is_some());
    }

    #[test]
    fn test_forgotten_event_is_accepted_again() {
        let f = filter();
        let event = f.filter(&alternate_record("evt-1")).unwrap();
        f.forget(&event.event_id);
        assert!(f.filter(&alternate_record("evt-1")).is_some());
        assert!(f.filter(&alternate_record("evt-1")).is_none());
    }
}

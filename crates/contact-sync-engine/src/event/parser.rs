//! Audit-trail record parsing helpers.

use chrono::{DateTime, Utc};
use contact_sync_core::ContactKind;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Fields every audit-trail record must carry.
pub const REQUIRED_FIELDS: [&str; 6] = [
    "eventID",
    "eventName",
    "eventTime",
    "userIdentity",
    "recipientAccountId",
    "requestParameters",
];

/// Split a feed payload into individual audit-trail records.
///
/// Accepts a single envelope with a `detail` field, a batch with
/// `Records[].detail`, or a bare record. Batch entries without an object
/// `detail` are skipped.
pub fn unwrap_feed_payload(payload: &Value) -> Vec<Value> {
    if let Some(detail) = payload.get("detail") {
        return vec![detail.clone()];
    }

    if let Some(records) = payload.get("Records").and_then(Value::as_array) {
        return records
            .iter()
            .filter_map(|record| match record.get("detail") {
                Some(detail) if detail.is_object() => Some(detail.clone()),
                _ => {
                    debug!("Skipping feed record without detail");
                    None
                }
            })
            .collect();
    }

    if payload.get("eventName").is_some() {
        return vec![payload.clone()];
    }

    warn!("Unknown feed payload format, no detail or Records field");
    Vec::new()
}

/// Fail with `MalformedEvent` if any required field is absent.
pub fn check_required_fields(record: &Value) -> SyncResult<()> {
    for field in REQUIRED_FIELDS {
        if record.get(field).is_none() {
            return Err(SyncError::malformed(format!("missing required field {field}")));
        }
    }
    Ok(())
}

/// Read a required string field.
pub fn string_field<'a>(record: &'a Value, field: &str) -> SyncResult<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::malformed(format!("{field} must be a string")))
}

/// Parse an RFC 3339 event time.
pub fn parse_event_time(value: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SyncError::malformed(format!("invalid eventTime {value:?}: {e}")))
}

/// Who made the change: `arn`, else `userName`, else `type:principalId`.
pub fn extract_principal(user_identity: &Value) -> String {
    let field = |name: &str| user_identity.get(name).and_then(Value::as_str);

    if let Some(arn) = field("arn") {
        return arn.to_string();
    }
    if let Some(user_name) = field("userName") {
        return user_name.to_string();
    }
    if let (Some(kind), Some(principal_id)) = (field("type"), field("principalId")) {
        return format!("{kind}:{principal_id}");
    }
    "unknown".to_string()
}

/// Alternate contact kind named in the request parameters.
pub fn alternate_kind(request_parameters: &Value) -> SyncResult<ContactKind> {
    let value = request_parameters
        .get("AlternateContactType")
        .or_else(|| request_parameters.get("alternateContactType"))
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::malformed("missing AlternateContactType in request parameters"))?;

    match value {
        "BILLING" => Ok(ContactKind::Billing),
        "OPERATIONS" => Ok(ContactKind::Operations),
        "SECURITY" => Ok(ContactKind::Security),
        other => Err(SyncError::malformed(format!(
            "invalid alternate contact type: {other}"
        ))),
    }
}

/// Whether the request addressed a specific member account.
///
/// Changes made by the engine itself always carry `accountId`, which is what
/// keeps propagated writes from triggering new runs.
pub fn targets_member_account(request_parameters: &Value) -> Option<String> {
    request_parameters.get("accountId").map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

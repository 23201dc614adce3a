//! Notification policy evaluation.

use contact_sync_core::SyncOperation;

use super::formatter::format_notification;
use super::{Notification, NotificationKind};
use crate::config::NotificationPolicy;

/// Decide which notification, if any, a terminal operation warrants.
///
/// Non-terminal operations never produce one.
pub fn classify(operation: &SyncOperation, policy: &NotificationPolicy) -> Option<NotificationKind> {
    if !operation.status.is_terminal() {
        return None;
    }

    if operation.is_operation_level_failure() {
        return policy
            .notify_on_failure
            .then_some(NotificationKind::SystemError);
    }

    let total = operation.target_account_ids.len();
    let failed = operation.failed_count();

    if failed == 0 {
        policy.notify_on_success.then_some(NotificationKind::Success)
    } else if failed == total {
        policy
            .notify_on_failure
            .then_some(NotificationKind::CompleteFailure)
    } else if failed >= policy.failure_threshold as usize {
        policy
            .notify_on_partial_failure
            .then_some(NotificationKind::PartialFailure)
    } else {
        None
    }
}

/// Classify and format in one step. Pure; nothing is sent.
pub fn evaluate(operation: &SyncOperation, policy: &NotificationPolicy) -> Option<Notification> {
    classify(operation, policy).map(|kind| format_notification(operation, kind))
}

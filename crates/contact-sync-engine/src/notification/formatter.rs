//! Human-readable notification text.

use chrono::Utc;
use contact_sync_core::{AccountSyncResult, AccountSyncStatus, NotificationId, SyncOperation};
use std::fmt::Write;

use super::{Notification, NotificationKind, NotificationMetadata};

/// Failed accounts listed individually before the rest is summarized.
const MAX_LISTED_FAILURES: usize = 10;

/// Error kind that marks an authorization failure on a target.
const PERMISSION_ERROR_KIND: &str = "ACCESS_DENIED";

/// Build the notification of `kind` for `operation`.
#[must_use]
pub fn format_notification(operation: &SyncOperation, kind: NotificationKind) -> Notification {
    let failed: Vec<&AccountSyncResult> = operation
        .results
        .values()
        .filter(|r| r.is_failure())
        .collect();
    let permission: Vec<&AccountSyncResult> = failed
        .iter()
        .copied()
        .filter(|r| r.error_kind.as_deref() == Some(PERMISSION_ERROR_KIND))
        .collect();

    let metadata = metadata(operation, failed.len(), permission.len());
    let title = format!(
        "Contact Sync: {} - {}",
        headline(kind),
        operation.contact_kind
    );

    let mut body = String::new();
    let _ = writeln!(body, "{}", summary(kind));
    let _ = writeln!(body);
    write_details(&mut body, &metadata, kind);

    match kind {
        NotificationKind::SystemError => {
            let _ = writeln!(body);
            let _ = writeln!(body, "Error Details:");
            let _ = writeln!(
                body,
                "{}",
                operation
                    .failure_reason
                    .as_deref()
                    .unwrap_or("Unknown error")
            );
        }
        NotificationKind::CompleteFailure | NotificationKind::PartialFailure => {
            let _ = writeln!(body);
            let _ = writeln!(body, "Failed Accounts:");
            write_accounts(&mut body, &failed);
            if !permission.is_empty() {
                let _ = writeln!(body);
                let _ = writeln!(body, "Permission Errors:");
                write_accounts(&mut body, &permission);
            }
        }
        NotificationKind::Success => {}
    }

    let actions = actions(kind, !permission.is_empty());
    if !actions.is_empty() {
        let _ = writeln!(body);
        let _ = writeln!(body, "Recommended Actions:");
        for (n, action) in actions.iter().enumerate() {
            let _ = writeln!(body, "{}. {action}", n + 1);
        }
    }

    Notification {
        id: NotificationId::new(),
        sync_id: operation.sync_id,
        kind,
        priority: kind.priority(),
        title,
        body: body.trim_end().to_string(),
        metadata,
        created_at: Utc::now(),
    }
}

fn metadata(
    operation: &SyncOperation,
    failed_count: usize,
    permission_error_count: usize,
) -> NotificationMetadata {
    let total_count = operation.target_account_ids.len();
    let failure_rate = if total_count == 0 {
        0.0
    } else {
        failed_count as f64 / total_count as f64
    };

    NotificationMetadata {
        contact_kind: operation.contact_kind,
        source_account_id: operation.source_account_id.clone(),
        initiating_principal: operation.initiating_principal.clone(),
        total_count,
        successful_count: operation.count_with_status(AccountSyncStatus::Success),
        skipped_count: operation.count_with_status(AccountSyncStatus::Skipped),
        failed_count,
        permission_error_count,
        failure_rate,
        failure_reason: operation.failure_reason.clone(),
    }
}

fn headline(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::SystemError => "System Error",
        NotificationKind::CompleteFailure => "Complete Failure",
        NotificationKind::PartialFailure => "Partial Failure",
        NotificationKind::Success => "Success",
    }
}

fn summary(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::SystemError => "Contact synchronization encountered a system error.",
        NotificationKind::CompleteFailure => {
            "Contact synchronization failed for ALL target accounts."
        }
        NotificationKind::PartialFailure => "Contact synchronization partially failed.",
        NotificationKind::Success => "Contact synchronization completed successfully.",
    }
}

fn write_details(body: &mut String, metadata: &NotificationMetadata, kind: NotificationKind) {
    let _ = writeln!(body, "Sync Details:");
    let _ = writeln!(body, "- Contact Type: {}", metadata.contact_kind);
    let _ = writeln!(body, "- Source Account: {}", metadata.source_account_id);
    let _ = writeln!(body, "- Initiating Principal: {}", metadata.initiating_principal);
    if kind == NotificationKind::SystemError {
        return;
    }
    let _ = writeln!(body, "- Total Accounts: {}", metadata.total_count);
    let _ = writeln!(body, "- Successful: {}", metadata.successful_count);
    let _ = writeln!(body, "- Skipped: {}", metadata.skipped_count);
    let _ = writeln!(body, "- Failed: {}", metadata.failed_count);
}

fn write_accounts(body: &mut String, results: &[&AccountSyncResult]) {
    for result in results.iter().take(MAX_LISTED_FAILURES) {
        let _ = writeln!(
            body,
            "- {}: {}",
            result.account_id,
            result.error_message.as_deref().unwrap_or("Unknown error")
        );
    }
    if results.len() > MAX_LISTED_FAILURES {
        let _ = writeln!(
            body,
            "... and {} more accounts",
            results.len() - MAX_LISTED_FAILURES
        );
    }
}

fn actions(kind: NotificationKind, has_permission_errors: bool) -> Vec<&'static str> {
    let mut actions = match kind {
        NotificationKind::SystemError => vec![
            "Check the health of the account directory",
            "Review the sync logs for detailed error information",
            "Re-run the change once the directory is reachable",
        ],
        NotificationKind::CompleteFailure => vec![
            "Check the health of the account directory",
            "Review the sync logs for detailed error information",
            "Consider manual contact updates if urgent",
        ],
        NotificationKind::PartialFailure => vec![
            "Review the sync logs for the failed accounts",
            "Consider retrying the failed accounts manually",
        ],
        NotificationKind::Success => Vec::new(),
    };
    if has_permission_errors {
        actions.insert(0, "Verify the sync role is allowed to manage contacts on the failed accounts");
    }
    actions
}

//! Behavioral guarantees of the sync engine.

mod common;

use common::*;
use contact_sync_engine::{
    AccountProcessor, AccountSyncResult, AccountSyncStatus, ChannelRegistry, Configuration,
    ConfigurationSource, ContactKind, DirectoryError, InMemoryConfigurationSource, InMemoryStateTracker,
    NotificationKind, NotificationPolicy, RetryPolicy, StateTracker, SyncEngine, SyncError,
    SyncStatus,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        backoff_base: 2.0,
    }
}

struct Harness {
    engine: SyncEngine,
    tracker: Arc<InMemoryStateTracker>,
    config: Arc<InMemoryConfigurationSource>,
}

fn harness(directory: Arc<FakeDirectory>, config: Configuration, channels: ChannelRegistry) -> Harness {
    init_test_logging();
    let tracker = Arc::new(InMemoryStateTracker::new());
    let config = Arc::new(InMemoryConfigurationSource::new(config));
    let engine = SyncEngine::builder(settings())
        .directory(directory)
        .tracker(tracker.clone())
        .configuration_source(config.clone())
        .channels(channels)
        .build()
        .unwrap();
    Harness {
        engine,
        tracker,
        config,
    }
}

#[tokio::test]
async fn test_engine_writes_do_not_trigger_new_runs() {
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 3);
    let h = harness(
        directory.clone(),
        Configuration::builder()
            .retry_policy(fast_retries(3))
            .build()
            .unwrap(),
        ChannelRegistry::new(),
    );

    let op = h
        .engine
        .handle_payload(&alternate_change("evt-1", "BILLING"))
        .await
        .handles
        .pop()
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(op.status, SyncStatus::Completed);

    // Feed back the audit records our own writes produced.
    for (n, target) in op.target_account_ids.iter().enumerate() {
        let echo = propagated_write(&format!("echo-{n}"), target.as_str(), "BILLING");
        let handles = h.engine.handle_payload(&echo).await.handles;
        assert!(handles.is_empty());
    }
    assert_eq!(h.tracker.len().await, 1);
}

#[tokio::test]
async fn test_redelivered_event_runs_once() {
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 2);
    let h = harness(directory, Configuration::default(), ChannelRegistry::new());

    let first = h
        .engine
        .handle_payload(&alternate_change("evt-dup", "BILLING"))
        .await
        .handles;
    let second = h
        .engine
        .handle_payload(&alternate_change("evt-dup", "BILLING"))
        .await
        .handles;

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    for handle in first {
        handle.wait().await.unwrap();
    }
    assert_eq!(h.tracker.len().await, 1);
}

fn engine_with_tracker(directory: Arc<FakeDirectory>, tracker: Arc<FlakyTracker>) -> SyncEngine {
    init_test_logging();
    SyncEngine::builder(settings())
        .directory(directory)
        .tracker(tracker)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_redelivery_after_failed_intake_runs() {
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 2);
    let tracker = FlakyTracker::failing_creates(1);
    let engine = engine_with_tracker(directory.clone(), tracker.clone());

    let first = engine
        .handle_payload(&alternate_change("evt-1", "BILLING"))
        .await;
    assert!(first.handles.is_empty());
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].event_id.as_str(), "evt-1");
    assert!(matches!(first.failures[0].error, SyncError::Storage { .. }));

    let redelivered = engine
        .handle_payload(&alternate_change("evt-1", "BILLING"))
        .await;
    assert!(redelivered.is_clean());
    assert_eq!(redelivered.handles.len(), 1);
    for handle in redelivered.handles {
        let op = handle.wait().await.unwrap();
        assert_eq!(op.status, SyncStatus::Completed);
    }
    assert_eq!(directory.total_writes(), 2);
    assert_eq!(tracker.len().await, 1);

    // Once started, the event id is remembered again.
    let third = engine
        .handle_payload(&alternate_change("evt-1", "BILLING"))
        .await;
    assert!(third.handles.is_empty());
    assert!(third.is_clean());
}

#[tokio::test]
async fn test_failed_record_does_not_stop_the_batch() {
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 2);
    let tracker = FlakyTracker::failing_creates(1);
    let engine = engine_with_tracker(directory.clone(), tracker.clone());

    let batch = serde_json::json!({
        "Records": [
            alternate_change("evt-1", "BILLING"),
            alternate_change("evt-2", "BILLING"),
        ]
    });
    let report = engine.handle_payload(&batch).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].event_id.as_str(), "evt-1");
    assert_eq!(report.handles.len(), 1);
    for handle in report.handles {
        let op = handle.wait().await.unwrap();
        assert_eq!(op.event_id.as_str(), "evt-2");
        assert_eq!(op.status, SyncStatus::Completed);
    }
    assert_eq!(tracker.len().await, 1);
}

#[tokio::test]
async fn test_matching_target_is_skipped_without_write() {
    let payload = alternate(ContactKind::Security, "security@example.com");
    let directory = FakeDirectory::new(payload.clone(), 2);
    directory.set_contact(&numbered(1), payload.clone());
    let h = harness(directory.clone(), Configuration::default(), ChannelRegistry::new());

    let op = h
        .engine
        .handle_payload(&alternate_change("evt-1", "SECURITY"))
        .await
        .handles
        .pop()
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(op.results[&numbered(1)].status, AccountSyncStatus::Skipped);
    assert_eq!(op.results[&numbered(2)].status, AccountSyncStatus::Success);
    assert_eq!(directory.write_count(&numbered(1)), 0);
    assert_eq!(op.status, SyncStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_exponentially() {
    init_test_logging();
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 1);
    let target = numbered(1);
    directory.queue_write_errors(
        &target,
        vec![
            DirectoryError::from_code("ThrottlingException", "rate exceeded"),
            DirectoryError::from_code("ServiceUnavailableException", "try later"),
        ],
    );
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(60),
        backoff_base: 2.0,
    };
    let processor = AccountProcessor::new(directory.clone(), Duration::from_secs(300));

    let result = processor
        .process(
            &target,
            ContactKind::Billing,
            &alternate(ContactKind::Billing, "billing@example.com"),
            &policy,
        )
        .await;

    assert_eq!(result.status, AccountSyncStatus::Success);
    assert_eq!(result.retry_count, 2);
    let times = directory.write_times(&target);
    assert_eq!(times.len(), 3);
    assert_eq!(times[1] - times[0], Duration::from_secs(2));
    assert_eq!(times[2] - times[1], Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_max_attempts() {
    init_test_logging();
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 1);
    let target = numbered(1);
    directory.fail_writes(&target, DirectoryError::from_code("Throttling", "rate exceeded"));
    let policy = RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(3),
        backoff_base: 2.0,
    };
    let processor = AccountProcessor::new(directory.clone(), Duration::from_secs(300));

    let result = processor
        .process(
            &target,
            ContactKind::Billing,
            &alternate(ContactKind::Billing, "billing@example.com"),
            &policy,
        )
        .await;

    assert_eq!(result.status, AccountSyncStatus::Failed);
    assert_eq!(result.retry_count, 3);
    assert_eq!(result.error_kind.as_deref(), Some("THROTTLED"));
    let times = directory.write_times(&target);
    assert_eq!(times.len(), 4);
    // 1s, 2s, then capped at 3s.
    assert_eq!(times[3] - times[2], Duration::from_secs(3));
}

#[tokio::test]
async fn test_failing_targets_do_not_block_others() {
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 6);
    directory.fail_writes(
        &numbered(2),
        DirectoryError::from_code("ValidationException", "bad target state"),
    );
    directory.fail_writes(
        &numbered(5),
        DirectoryError::from_code("RequestTimeout", "timed out"),
    );
    let h = harness(
        directory.clone(),
        Configuration::builder()
            .retry_policy(fast_retries(2))
            .build()
            .unwrap(),
        ChannelRegistry::new(),
    );

    let op = h
        .engine
        .handle_payload(&alternate_change("evt-1", "BILLING"))
        .await
        .handles
        .pop()
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(op.results.len(), 6);
    assert_eq!(op.failed_count(), 2);
    assert_eq!(op.results[&numbered(5)].retry_count, 1);
    for n in [1, 3, 4, 6] {
        assert_eq!(op.results[&numbered(n)].status, AccountSyncStatus::Success);
    }
    assert_eq!(op.status, SyncStatus::Failed);
}

#[tokio::test]
async fn test_configuration_change_applies_to_next_operation_only() {
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 3);
    let h = harness(directory, Configuration::default(), ChannelRegistry::new());

    let running = h
        .engine
        .handle_payload(&alternate_change("evt-1", "BILLING"))
        .await
        .handles
        .pop()
        .unwrap();

    let updated = Configuration::builder().exclude(numbered(1)).build().unwrap();
    let version = h.engine.update_configuration(updated.to_raw()).await.unwrap();
    assert_eq!(version, 1);

    let first = running.wait().await.unwrap();
    assert_eq!(first.target_account_ids.len(), 3);

    let second = h
        .engine
        .handle_payload(&alternate_change("evt-2", "BILLING"))
        .await
        .handles
        .pop()
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(second.target_account_ids.len(), 2);
    assert!(!second.target_account_ids.contains(&numbered(1)));
    assert_eq!(
        h.config.read_versioned().await.unwrap().version,
        1,
        "configuration source should hold the update"
    );
}

#[tokio::test]
async fn test_finished_operation_cannot_be_rewritten() {
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 2);
    let h = harness(directory, Configuration::default(), ChannelRegistry::new());

    let op = h
        .engine
        .handle_payload(&alternate_change("evt-1", "BILLING"))
        .await
        .handles
        .pop()
        .unwrap()
        .wait()
        .await
        .unwrap();

    let rewrite = h
        .tracker
        .record_result(
            op.sync_id,
            AccountSyncResult::failed(numbered(1), 0, "ACCESS_DENIED", "late write"),
        )
        .await
        .unwrap_err();
    assert!(matches!(rewrite, SyncError::DuplicateResult { .. }));

    let reopen = h
        .tracker
        .update_status(op.sync_id, SyncStatus::InProgress, None)
        .await
        .unwrap_err();
    assert!(matches!(reopen, SyncError::InvalidTransition { .. }));

    assert_eq!(h.engine.get(op.sync_id).await.unwrap().unwrap(), op);
}

#[tokio::test]
async fn test_history_and_statistics() {
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 2);
    directory.fail_writes(
        &numbered(2),
        DirectoryError::from_code("AccessDenied", "no role"),
    );
    let h = harness(directory, Configuration::default(), ChannelRegistry::new());

    for id in ["evt-1", "evt-2"] {
        for handle in h
            .engine
            .handle_payload(&alternate_change(id, "BILLING"))
            .await
            .handles
        {
            handle.wait().await.unwrap();
        }
    }

    let since = chrono::Utc::now() - chrono::Duration::hours(1);
    assert_eq!(h.engine.list_recent(since).await.unwrap().len(), 2);

    let stats = h.engine.statistics(since).await.unwrap();
    assert_eq!(stats.total_operations, 2);
    assert_eq!(stats.operations_with(SyncStatus::Failed), 2);
    assert_eq!(stats.results_with(AccountSyncStatus::Success), 2);
    assert_eq!(stats.results_with(AccountSyncStatus::Failed), 2);
}

#[tokio::test]
async fn test_fallback_channel_used_when_primary_fails() {
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 1);
    directory.fail_writes(
        &numbered(1),
        DirectoryError::from_code("AccessDenied", "no role"),
    );
    let primary = RecordingChannel::failing();
    let fallback = RecordingChannel::new();
    let h = harness(
        directory,
        Configuration::builder()
            .notification_policy(NotificationPolicy::default())
            .build()
            .unwrap(),
        ChannelRegistry::new()
            .with_channel("primary", primary.clone())
            .with_channel("fallback", fallback.clone()),
    );

    let op = h
        .engine
        .handle_payload(&alternate_change("evt-1", "BILLING"))
        .await
        .handles
        .pop()
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(op.status, SyncStatus::Failed);
    assert_eq!(primary.received().len(), 1);
    let delivered = fallback.received();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, NotificationKind::CompleteFailure);
    assert_eq!(delivered[0].sync_id, op.sync_id);
}

//! End-to-end sync scenarios driven through the engine facade.

mod common;

use common::*;
use contact_sync_engine::{
    AccountSyncStatus, ChannelRegistry, Configuration, ContactKind, DirectoryError,
    InMemoryConfigurationSource, InMemoryStateTracker, NotificationKind, NotificationPolicy,
    Priority, RetryPolicy, StateTracker, SyncEngine, SyncStatus,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        backoff_base: 2.0,
    }
}

fn engine(
    directory: Arc<FakeDirectory>,
    config: Configuration,
    channel: Arc<RecordingChannel>,
) -> (SyncEngine, Arc<InMemoryStateTracker>) {
    init_test_logging();
    let tracker = Arc::new(InMemoryStateTracker::new());
    let engine = SyncEngine::builder(settings())
        .directory(directory)
        .tracker(tracker.clone())
        .configuration_source(Arc::new(InMemoryConfigurationSource::new(config)))
        .channels(ChannelRegistry::new().with_channel("primary", channel))
        .build()
        .unwrap();
    (engine, tracker)
}

#[tokio::test]
async fn test_billing_change_reaches_every_target_without_notification() {
    let payload = alternate(ContactKind::Billing, "billing@example.com");
    let directory = FakeDirectory::new(payload.clone(), 4);
    let channel = RecordingChannel::new();
    let config = Configuration::builder()
        .retry_policy(fast_retries())
        .build()
        .unwrap();
    let (engine, _) = engine(directory.clone(), config, channel.clone());

    let handles = engine
        .handle_payload(&alternate_change("evt-1", "BILLING"))
        .await
        .handles;
    assert_eq!(handles.len(), 1);
    let op = handles.into_iter().next().unwrap().wait().await.unwrap();

    assert_eq!(op.status, SyncStatus::Completed);
    assert_eq!(op.target_account_ids.len(), 4);
    assert_eq!(op.results.len(), 4);
    assert!(op
        .results
        .values()
        .all(|r| r.status == AccountSyncStatus::Success));
    for n in 1..=4 {
        assert_eq!(
            directory.contact(&numbered(n), ContactKind::Billing),
            Some(payload.clone())
        );
    }
    assert!(channel.received().is_empty());
}

#[tokio::test]
async fn test_excluded_account_is_not_targeted() {
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 4);
    let config = Configuration::builder()
        .exclude(numbered(2))
        .retry_policy(fast_retries())
        .build()
        .unwrap();
    let (engine, _) = engine(directory.clone(), config, RecordingChannel::new());

    let handle = engine
        .handle_payload(&alternate_change("evt-1", "BILLING"))
        .await
        .handles
        .pop()
        .unwrap();
    let op = handle.wait().await.unwrap();

    assert_eq!(op.target_account_ids.len(), 3);
    assert!(!op.target_account_ids.contains(&numbered(2)));
    assert!(!op.results.contains_key(&numbered(2)));
    assert_eq!(directory.write_count(&numbered(2)), 0);
}

#[tokio::test]
async fn test_disabled_kind_creates_no_operation() {
    let directory = FakeDirectory::new(alternate(ContactKind::Operations, "ops@example.com"), 2);
    let config = Configuration::builder()
        .contact_kinds([ContactKind::Billing])
        .build()
        .unwrap();
    let (engine, tracker) = engine(directory.clone(), config, RecordingChannel::new());

    let handles = engine
        .handle_payload(&alternate_change("evt-1", "OPERATIONS"))
        .await
        .handles;

    assert!(handles.is_empty());
    assert!(tracker.is_empty().await);
    assert_eq!(directory.total_writes(), 0);
}

#[tokio::test]
async fn test_single_permanent_failure_escalates_at_medium() {
    let directory = FakeDirectory::new(alternate(ContactKind::Billing, "billing@example.com"), 4);
    directory.fail_writes(
        &numbered(3),
        DirectoryError::from_code("AccessDeniedException", "not authorized to manage contacts"),
    );
    let channel = RecordingChannel::new();
    let config = Configuration::builder()
        .retry_policy(fast_retries())
        .notification_policy(NotificationPolicy {
            failure_threshold: 1,
            notify_on_partial_failure: true,
            ..NotificationPolicy::default()
        })
        .build()
        .unwrap();
    let (engine, tracker) = engine(directory.clone(), config, channel.clone());

    let op = engine
        .handle_payload(&alternate_change("evt-1", "BILLING"))
        .await
        .handles
        .pop()
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(op.status, SyncStatus::Failed);
    let failed = &op.results[&numbered(3)];
    assert_eq!(failed.status, AccountSyncStatus::Failed);
    assert_eq!(failed.retry_count, 0);
    assert_eq!(failed.error_kind.as_deref(), Some("ACCESS_DENIED"));
    assert_eq!(directory.write_count(&numbered(3)), 1);
    assert_eq!(op.count_with_status(AccountSyncStatus::Success), 3);

    let received = channel.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].kind, NotificationKind::PartialFailure);
    assert_eq!(received[0].priority, Priority::Medium);
    assert_eq!(received[0].metadata.permission_error_count, 1);

    let stored = tracker.get(op.sync_id).await.unwrap().unwrap();
    assert_eq!(stored, op);
}

#[tokio::test]
async fn test_primary_contact_change_is_propagated() {
    use contact_sync_engine::{ContactPayload, PrimaryContact};

    let payload = ContactPayload::Primary(PrimaryContact {
        full_name: "Example Corp".to_string(),
        address_lines: vec!["1 Main St".to_string()],
        city: "Springfield".to_string(),
        country_code: "US".to_string(),
        postal_code: "12345".to_string(),
        phone_number: "+1-555-0100".to_string(),
        company_name: Some("Example Corp".to_string()),
        district_or_county: None,
        state_or_region: None,
        website_url: None,
    });
    let directory = FakeDirectory::new(payload.clone(), 2);
    let (engine, _) = engine(
        directory.clone(),
        Configuration::default(),
        RecordingChannel::new(),
    );

    let mut record = alternate_change("evt-primary", "BILLING");
    record["detail"]["eventName"] = "PutContactInformation".into();
    record["detail"]["requestParameters"] = serde_json::json!({"contactInformation": {}});

    let op = engine
        .handle_payload(&record)
        .await
        .handles
        .pop()
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(op.contact_kind, ContactKind::Primary);
    assert_eq!(op.status, SyncStatus::Completed);
    assert_eq!(
        directory.contact(&numbered(1), ContactKind::Primary),
        Some(payload)
    );
}

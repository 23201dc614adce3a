//! Common test utilities for contact-sync-engine integration tests.
//!
//! Provides an in-memory account directory with scriptable failures, a
//! recording notification channel and feed payload fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contact_sync_engine::{
    AccountDirectory, AccountId, AccountPage, AccountStatus, AccountSyncResult,
    AlternateContact, ContactKind, ContactPayload, DeliveryOutcome, DirectoryAccount,
    DirectoryError, DirectoryResult, EngineSettings, InMemoryStateTracker, Notification,
    NotificationChannel, StateTracker, SyncError, SyncId, SyncOperation, SyncQuery,
    SyncResult, SyncStatus,
};
use contact_sync_engine::notification::NotificationDeliveryError;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::time::Instant;

pub const SOURCE: &str = "000000000000";

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

pub fn account(id: &str) -> AccountId {
    AccountId::new(id).unwrap()
}

/// Twelve-digit account id for `n`.
pub fn numbered(n: usize) -> AccountId {
    AccountId::new(format!("{n:012}")).unwrap()
}

pub fn settings() -> EngineSettings {
    EngineSettings::builder(account(SOURCE)).build().unwrap()
}

pub fn alternate(kind: ContactKind, email: &str) -> ContactPayload {
    ContactPayload::Alternate(AlternateContact {
        kind,
        email: email.to_string(),
        name: "Pat Doe".to_string(),
        phone_number: "+1-555-0100".to_string(),
        title: "Controller".to_string(),
    })
}

// ---------------------------------------------------------------------------
// Feed fixtures
// ---------------------------------------------------------------------------

/// Alternate contact change made directly on the source account.
pub fn alternate_change(event_id: &str, kind: &str) -> Value {
    json!({
        "detail": {
            "eventID": event_id,
            "eventName": "PutAlternateContact",
            "eventTime": "2026-10-18T12:00:00Z",
            "eventSource": "account.example.com",
            "userIdentity": {"arn": "arn:example:iam::000000000000:user/admin"},
            "recipientAccountId": SOURCE,
            "requestParameters": {
                "alternateContactType": kind,
                "emailAddress": "billing@example.com"
            }
        }
    })
}

/// The audit record the engine's own write to `target` produces.
pub fn propagated_write(event_id: &str, target: &str, kind: &str) -> Value {
    json!({
        "detail": {
            "eventID": event_id,
            "eventName": "PutAlternateContact",
            "eventTime": "2026-10-18T12:00:05Z",
            "userIdentity": {"arn": "arn:example:sts::000000000000:assumed-role/contact-sync"},
            "recipientAccountId": SOURCE,
            "requestParameters": {
                "accountId": target,
                "alternateContactType": kind
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// In-memory account directory.
///
/// Write failures can be scripted per account: queued errors are returned one
/// per write before writes succeed, a permanent error is returned on every
/// write.
#[derive(Default)]
pub struct FakeDirectory {
    accounts: Mutex<Vec<DirectoryAccount>>,
    contacts: Mutex<HashMap<(AccountId, ContactKind), ContactPayload>>,
    queued_write_errors: Mutex<HashMap<AccountId, VecDeque<DirectoryError>>>,
    failing_writes: Mutex<HashMap<AccountId, DirectoryError>>,
    writes: Mutex<Vec<(AccountId, Instant)>>,
}

impl FakeDirectory {
    /// Directory holding the source account with `payload` and `targets`
    /// active accounts.
    pub fn new(payload: ContactPayload, targets: usize) -> Arc<Self> {
        let directory = Self::default();
        directory.add_account(account(SOURCE), AccountStatus::Active);
        directory.set_contact(&account(SOURCE), payload);
        for n in 1..=targets {
            directory.add_account(numbered(n), AccountStatus::Active);
        }
        Arc::new(directory)
    }

    pub fn add_account(&self, id: AccountId, status: AccountStatus) {
        self.accounts
            .lock()
            .unwrap()
            .push(DirectoryAccount::new(id, status));
    }

    pub fn set_contact(&self, id: &AccountId, payload: ContactPayload) {
        self.contacts
            .lock()
            .unwrap()
            .insert((id.clone(), payload.kind()), payload);
    }

    pub fn contact(&self, id: &AccountId, kind: ContactKind) -> Option<ContactPayload> {
        self.contacts.lock().unwrap().get(&(id.clone(), kind)).cloned()
    }

    /// Return `errors` from the next writes to `id`, in order.
    pub fn queue_write_errors(&self, id: &AccountId, errors: Vec<DirectoryError>) {
        self.queued_write_errors
            .lock()
            .unwrap()
            .insert(id.clone(), errors.into());
    }

    /// Fail every write to `id` with `error`.
    pub fn fail_writes(&self, id: &AccountId, error: DirectoryError) {
        self.failing_writes.lock().unwrap().insert(id.clone(), error);
    }

    /// Number of write attempts on `id`, failed ones included.
    pub fn write_count(&self, id: &AccountId) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == id)
            .count()
    }

    /// Instants of the write attempts on `id`.
    pub fn write_times(&self, id: &AccountId) -> Vec<Instant> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == id)
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn total_writes(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

#[async_trait]
impl AccountDirectory for FakeDirectory {
    async fn list_accounts(&self, _page_token: Option<String>) -> DirectoryResult<AccountPage> {
        Ok(AccountPage {
            accounts: self.accounts.lock().unwrap().clone(),
            next_token: None,
        })
    }

    async fn get_contact(
        &self,
        account: &AccountId,
        kind: ContactKind,
    ) -> DirectoryResult<Option<ContactPayload>> {
        Ok(self.contact(account, kind))
    }

    async fn put_contact(
        &self,
        account: &AccountId,
        kind: ContactKind,
        payload: &ContactPayload,
    ) -> DirectoryResult<()> {
        self.writes
            .lock()
            .unwrap()
            .push((account.clone(), Instant::now()));

        if let Some(error) = self.failing_writes.lock().unwrap().get(account) {
            return Err(error.clone());
        }
        let queued = self
            .queued_write_errors
            .lock()
            .unwrap()
            .get_mut(account)
            .and_then(VecDeque::pop_front);
        if let Some(error) = queued {
            return Err(error);
        }

        self.contacts
            .lock()
            .unwrap()
            .insert((account.clone(), kind), payload.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notification channel
// ---------------------------------------------------------------------------

/// Channel that keeps every notification it is handed.
#[derive(Default)]
pub struct RecordingChannel {
    received: Mutex<Vec<Notification>>,
    failing: bool,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A channel that records the attempt and then fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            failing: true,
        })
    }

    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(
        &self,
        notification: &Notification,
    ) -> Result<DeliveryOutcome, NotificationDeliveryError> {
        self.received.lock().unwrap().push(notification.clone());
        if self.failing {
            return Err(NotificationDeliveryError::other("channel offline"));
        }
        Ok(DeliveryOutcome::Delivered)
    }
}

// ---------------------------------------------------------------------------
// State tracker
// ---------------------------------------------------------------------------

/// In-memory tracker whose first `create` calls fail with a storage error.
pub struct FlakyTracker {
    inner: InMemoryStateTracker,
    failing_creates: AtomicUsize,
}

impl FlakyTracker {
    pub fn failing_creates(count: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStateTracker::new(),
            failing_creates: AtomicUsize::new(count),
        })
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl StateTracker for FlakyTracker {
    async fn create(&self, operation: &SyncOperation) -> SyncResult<()> {
        let remaining = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining.is_ok() {
            return Err(SyncError::storage("connection reset"));
        }
        self.inner.create(operation).await
    }

    async fn assign_targets(
        &self,
        sync_id: SyncId,
        payload: &ContactPayload,
        targets: &[AccountId],
    ) -> SyncResult<()> {
        self.inner.assign_targets(sync_id, payload, targets).await
    }

    async fn update_status(
        &self,
        sync_id: SyncId,
        status: SyncStatus,
        failure_reason: Option<String>,
    ) -> SyncResult<SyncOperation> {
        self.inner.update_status(sync_id, status, failure_reason).await
    }

    async fn record_result(&self, sync_id: SyncId, result: AccountSyncResult) -> SyncResult<()> {
        self.inner.record_result(sync_id, result).await
    }

    async fn get(&self, sync_id: SyncId) -> SyncResult<Option<SyncOperation>> {
        self.inner.get(sync_id).await
    }

    async fn list_recent(&self, since: DateTime<Utc>) -> SyncResult<Vec<SyncOperation>> {
        self.inner.list_recent(since).await
    }

    async fn query(&self, query: &SyncQuery) -> SyncResult<Vec<SyncOperation>> {
        self.inner.query(query).await
    }
}

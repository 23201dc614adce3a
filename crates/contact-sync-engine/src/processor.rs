//! Per-account contact propagation.
//!
//! The processor brings one target account in line with the source contact.
//! It reads before it writes so that a target which already holds the contact
//! is skipped, retries transient failures with exponential backoff and never
//! lets a single call outlive the per-account deadline.

use contact_sync_core::{AccountId, AccountSyncResult, ContactKind, ContactPayload};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::comparator::{ContactComparator, ExactComparator};
use crate::config::RetryPolicy;
use crate::directory::{AccountDirectory, DirectoryError, DirectoryResult};
use crate::error::SyncError;
use crate::resilience::{backoff_delay, CircuitBreaker};

/// Error kind recorded when the payload does not belong to the requested kind.
pub const PAYLOAD_KIND_MISMATCH: &str = "PAYLOAD_KIND_MISMATCH";

/// What a successful attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    AlreadyMatched,
    Written,
}

/// Applies a contact to a single target account.
#[derive(Clone)]
pub struct AccountProcessor {
    directory: Arc<dyn AccountDirectory>,
    comparator: Arc<dyn ContactComparator>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    deadline: Duration,
}

impl AccountProcessor {
    /// Create a processor with exact comparison and no circuit breaker.
    pub fn new(directory: Arc<dyn AccountDirectory>, deadline: Duration) -> Self {
        Self {
            directory,
            comparator: Arc::new(ExactComparator),
            circuit_breaker: None,
            deadline,
        }
    }

    /// Use a different equality predicate.
    #[must_use]
    pub fn with_comparator(mut self, comparator: Arc<dyn ContactComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Guard directory calls with a shared circuit breaker.
    #[must_use]
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Propagate `payload` to `target`.
    ///
    /// Always returns a result; failures are recorded in it rather than raised.
    #[instrument(skip(self, payload, retry_policy), fields(account_id = %target, contact_kind = %kind))]
    pub async fn process(
        &self,
        target: &AccountId,
        kind: ContactKind,
        payload: &ContactPayload,
        retry_policy: &RetryPolicy,
    ) -> AccountSyncResult {
        if payload.kind() != kind {
            error!(payload_kind = %payload.kind(), "Payload does not match contact kind");
            return AccountSyncResult::failed(
                target.clone(),
                0,
                PAYLOAD_KIND_MISMATCH,
                format!("payload of kind {} cannot update {kind}", payload.kind()),
            );
        }

        let deadline = Instant::now() + self.deadline;
        let mut attempt: u32 = 1;

        loop {
            let err = match self.attempt(target, kind, payload, deadline).await {
                Ok(AttemptOutcome::AlreadyMatched) if attempt == 1 => {
                    info!("Target already up to date, skipping");
                    return AccountSyncResult::skipped(target.clone());
                }
                Ok(outcome) => {
                    info!(attempt, ?outcome, "Target updated");
                    return AccountSyncResult::success(target.clone(), attempt - 1);
                }
                Err(e) => e,
            };

            if !err.is_transient() {
                let classified = SyncError::target(target.clone(), &err);
                error!(attempt, error = %classified, "Permanent failure");
                return failed(target, attempt, &err, err.to_string());
            }

            if attempt >= retry_policy.max_attempts {
                error!(attempt, error = %err, "Retries exhausted");
                return failed(
                    target,
                    attempt,
                    &err,
                    format!("giving up after {attempt} attempt(s): {err}"),
                );
            }

            let delay = backoff_delay(retry_policy, attempt);
            if Instant::now() + delay >= deadline {
                error!(attempt, error = %err, "Account deadline reached");
                return failed(
                    target,
                    attempt,
                    &err,
                    format!("deadline reached after {attempt} attempt(s): {err}"),
                );
            }

            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        target: &AccountId,
        kind: ContactKind,
        payload: &ContactPayload,
        deadline: Instant,
    ) -> DirectoryResult<AttemptOutcome> {
        let Some(breaker) = &self.circuit_breaker else {
            return self.read_then_write(target, kind, payload, deadline).await;
        };

        if !breaker.is_allowed().await {
            return Err(DirectoryError::CircuitOpen);
        }

        let result = self.read_then_write(target, kind, payload, deadline).await;
        match &result {
            Ok(_) => breaker.record_success().await,
            Err(e) if e.is_transient() => breaker.record_failure().await,
            Err(_) => {}
        }
        result
    }

    async fn read_then_write(
        &self,
        target: &AccountId,
        kind: ContactKind,
        payload: &ContactPayload,
        deadline: Instant,
    ) -> DirectoryResult<AttemptOutcome> {
        let current = match bounded(deadline, self.directory.get_contact(target, kind)).await {
            Ok(current) => current,
            Err(DirectoryError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };

        if let Some(current) = current {
            if self.comparator.matches(&current, payload) {
                return Ok(AttemptOutcome::AlreadyMatched);
            }
        }

        bounded(deadline, self.directory.put_contact(target, kind, payload)).await?;
        Ok(AttemptOutcome::Written)
    }
}

async fn bounded<T>(
    deadline: Instant,
    call: impl Future<Output = DirectoryResult<T>>,
) -> DirectoryResult<T> {
    tokio::time::timeout_at(deadline, call)
        .await
        .unwrap_or(Err(DirectoryError::Timeout))
}

fn failed(
    target: &AccountId,
    attempts: u32,
    err: &DirectoryError,
    message: String,
) -> AccountSyncResult {
    AccountSyncResult::failed(target.clone(), attempts - 1, err.error_code(), message)
}

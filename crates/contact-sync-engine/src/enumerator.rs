//! Target enumeration.

use contact_sync_core::AccountId;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::Configuration;
use crate::directory::{AccountDirectory, AccountPage, DirectoryError};
use crate::error::{SyncError, SyncResult};
use crate::resilience::backoff_delay;

/// Lists the accounts a change should be propagated to.
#[derive(Clone)]
pub struct TargetEnumerator {
    directory: Arc<dyn AccountDirectory>,
}

impl TargetEnumerator {
    pub fn new(directory: Arc<dyn AccountDirectory>) -> Self {
        Self { directory }
    }

    /// Enumerate eligible targets in directory order.
    ///
    /// Keeps active accounts that are neither excluded nor the source. Either
    /// the full list is returned or `DirectoryUnavailable`.
    #[instrument(skip(self, snapshot), fields(source = %source_account))]
    pub async fn enumerate(
        &self,
        snapshot: &Configuration,
        source_account: &AccountId,
    ) -> SyncResult<Vec<AccountId>> {
        let mut targets = Vec::new();
        let mut seen = HashSet::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.fetch_page(snapshot, page_token.take()).await?;
            pages += 1;

            for account in page.accounts {
                if !seen.insert(account.id.clone()) {
                    continue;
                }
                if !account.status.is_active()
                    || snapshot.is_excluded(&account.id)
                    || &account.id == source_account
                {
                    continue;
                }
                targets.push(account.id);
            }

            match page.next_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(pages, targets = targets.len(), "Enumerated target accounts");
        Ok(targets)
    }

    async fn fetch_page(
        &self,
        snapshot: &Configuration,
        page_token: Option<String>,
    ) -> SyncResult<AccountPage> {
        let policy = snapshot.retry_policy();
        let mut attempt = 1;

        loop {
            match self.directory.list_accounts(page_token.clone()).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let delay = backoff_delay(policy, attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Listing accounts failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(unavailable(e, attempt)),
            }
        }
    }
}

fn unavailable(err: DirectoryError, attempts: u32) -> SyncError {
    SyncError::directory_unavailable(format!(
        "listing accounts failed after {attempts} attempt(s): {err}"
    ))
}

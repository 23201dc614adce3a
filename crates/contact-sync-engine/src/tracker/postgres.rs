//! Postgres state tracker.
//!
//! Operations live in `contact_sync_operations`, results in
//! `contact_sync_results` keyed by `(sync_id, account_id)`. Result inserts use
//! `ON CONFLICT DO NOTHING` so a second write for the same key can never
//! replace the first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contact_sync_core::{
    AccountId, AccountSyncResult, ContactKind, ContactPayload, EventId, SyncId, SyncOperation,
    SyncStatus,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;
use tracing::debug;

use super::{check_assignable, check_result, check_transition, StateTracker, SyncQuery};
use crate::error::{SyncError, SyncResult};

const OPERATION_COLUMNS: &str = "sync_id, event_id, created_at, updated_at, initiating_principal, \
     contact_kind, source_account_id, target_account_ids, status, contact_payload, \
     failure_reason, expires_at";

/// Tracker backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgStateTracker {
    pool: PgPool,
}

impl PgStateTracker {
    /// Create a tracker using `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> SyncResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SyncError::storage_with_source("migration failed", e))
    }

    async fn load<'e, E>(&self, executor: E, sync_id: SyncId, lock: bool) -> SyncResult<SyncOperation>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM contact_sync_operations WHERE sync_id = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(sync_id.as_uuid())
            .fetch_optional(executor)
            .await?
            .ok_or(SyncError::NotFound { sync_id })?;
        operation_from_row(&row)
    }

    async fn load_results(&self, sync_ids: &[uuid::Uuid]) -> SyncResult<Vec<(SyncId, AccountSyncResult)>> {
        if sync_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r"
            SELECT sync_id, account_id, status, attempted_at, retry_count, error_kind, error_message
            FROM contact_sync_results
            WHERE sync_id = ANY($1)
            ",
        )
        .bind(sync_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let sync_id = SyncId::from_uuid(row.try_get("sync_id")?);
                Ok((sync_id, result_from_row(row)?))
            })
            .collect()
    }

    async fn attach_results(&self, mut operations: Vec<SyncOperation>) -> SyncResult<Vec<SyncOperation>> {
        let ids: Vec<uuid::Uuid> = operations.iter().map(|op| *op.sync_id.as_uuid()).collect();
        let mut by_operation: BTreeMap<SyncId, Vec<AccountSyncResult>> = BTreeMap::new();
        for (sync_id, result) in self.load_results(&ids).await? {
            by_operation.entry(sync_id).or_default().push(result);
        }
        for operation in &mut operations {
            if let Some(results) = by_operation.remove(&operation.sync_id) {
                operation.results = results
                    .into_iter()
                    .map(|r| (r.account_id.clone(), r))
                    .collect();
            }
        }
        Ok(operations)
    }

    async fn get_full(&self, sync_id: SyncId) -> SyncResult<SyncOperation> {
        let operation = self.load(&self.pool, sync_id, false).await?;
        let mut operations = self.attach_results(vec![operation]).await?;
        operations
            .pop()
            .ok_or_else(|| SyncError::internal("operation vanished while loading results"))
    }
}

#[async_trait]
impl StateTracker for PgStateTracker {
    async fn create(&self, operation: &SyncOperation) -> SyncResult<()> {
        let targets: Vec<&str> = operation.target_account_ids.iter().map(AccountId::as_str).collect();
        let inserted = sqlx::query(
            r"
            INSERT INTO contact_sync_operations (
                sync_id, event_id, created_at, updated_at, initiating_principal,
                contact_kind, source_account_id, target_account_ids, status,
                contact_payload, failure_reason, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (sync_id) DO NOTHING
            ",
        )
        .bind(operation.sync_id.as_uuid())
        .bind(operation.event_id.as_str())
        .bind(operation.created_at)
        .bind(operation.updated_at)
        .bind(&operation.initiating_principal)
        .bind(operation.contact_kind.as_str())
        .bind(operation.source_account_id.as_str())
        .bind(Json(&targets))
        .bind(operation.status.as_str())
        .bind(operation.contact_payload.as_ref().map(Json))
        .bind(&operation.failure_reason)
        .bind(operation.expires_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(SyncError::DuplicateOperation {
                sync_id: operation.sync_id,
            });
        }
        debug!(sync_id = %operation.sync_id, "Sync operation created");
        Ok(())
    }

    async fn assign_targets(
        &self,
        sync_id: SyncId,
        payload: &ContactPayload,
        targets: &[AccountId],
    ) -> SyncResult<()> {
        let mut tx = self.pool.begin().await?;
        let operation = self.load(&mut *tx, sync_id, true).await?;
        check_assignable(&operation)?;

        let targets: Vec<&str> = targets.iter().map(AccountId::as_str).collect();
        sqlx::query(
            r"
            UPDATE contact_sync_operations
            SET target_account_ids = $2, contact_payload = $3, updated_at = NOW()
            WHERE sync_id = $1
            ",
        )
        .bind(sync_id.as_uuid())
        .bind(Json(&targets))
        .bind(Json(payload))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_status(
        &self,
        sync_id: SyncId,
        status: SyncStatus,
        failure_reason: Option<String>,
    ) -> SyncResult<SyncOperation> {
        let mut tx = self.pool.begin().await?;
        let operation = self.load(&mut *tx, sync_id, true).await?;

        let recorded: Vec<String> =
            sqlx::query_scalar("SELECT account_id FROM contact_sync_results WHERE sync_id = $1")
                .bind(sync_id.as_uuid())
                .fetch_all(&mut *tx)
                .await?;
        let mut check = operation.clone();
        for account in recorded {
            let account = AccountId::new(account)
                .map_err(|e| SyncError::storage(format!("stored account id invalid: {e}")))?;
            check
                .results
                .insert(account.clone(), AccountSyncResult::skipped(account));
        }
        check_transition(&check, status)?;

        sqlx::query(
            r"
            UPDATE contact_sync_operations
            SET status = $2, failure_reason = COALESCE($3, failure_reason), updated_at = NOW()
            WHERE sync_id = $1
            ",
        )
        .bind(sync_id.as_uuid())
        .bind(status.as_str())
        .bind(&failure_reason)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_full(sync_id).await
    }

    async fn record_result(&self, sync_id: SyncId, result: AccountSyncResult) -> SyncResult<()> {
        let operation = self.load(&self.pool, sync_id, false).await?;
        // Duplicates are detected by the insert below; only membership and
        // status are checked up front.
        check_result(&operation, &result.account_id)?;

        let inserted = sqlx::query(
            r"
            INSERT INTO contact_sync_results (
                sync_id, account_id, status, attempted_at, retry_count, error_kind, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (sync_id, account_id) DO NOTHING
            ",
        )
        .bind(sync_id.as_uuid())
        .bind(result.account_id.as_str())
        .bind(result.status.as_str())
        .bind(result.attempted_at)
        .bind(i32::try_from(result.retry_count).unwrap_or(i32::MAX))
        .bind(&result.error_kind)
        .bind(&result.error_message)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(SyncError::DuplicateResult {
                sync_id,
                account_id: result.account_id,
            });
        }

        sqlx::query("UPDATE contact_sync_operations SET updated_at = NOW() WHERE sync_id = $1")
            .bind(sync_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, sync_id: SyncId) -> SyncResult<Option<SyncOperation>> {
        match self.get_full(sync_id).await {
            Ok(operation) => Ok(Some(operation)),
            Err(SyncError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn query(&self, query: &SyncQuery) -> SyncResult<Vec<SyncOperation>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {OPERATION_COLUMNS} FROM contact_sync_operations WHERE TRUE"
        ));
        if let Some(since) = query.since {
            builder.push(" AND created_at >= ").push_bind(since);
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(kind) = query.contact_kind {
            builder.push(" AND contact_kind = ").push_bind(kind.as_str());
        }
        builder.push(" ORDER BY created_at DESC");
        if let Some(limit) = query.limit {
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        let operations = rows
            .iter()
            .map(operation_from_row)
            .collect::<SyncResult<Vec<_>>>()?;
        self.attach_results(operations).await
    }
}

fn corrupt(field: &str, err: impl std::fmt::Display) -> SyncError {
    SyncError::storage(format!("stored {field} is invalid: {err}"))
}

fn operation_from_row(row: &PgRow) -> SyncResult<SyncOperation> {
    let event_id: String = row.try_get("event_id")?;
    let contact_kind: String = row.try_get("contact_kind")?;
    let source_account_id: String = row.try_get("source_account_id")?;
    let status: String = row.try_get("status")?;
    let Json(targets): Json<Vec<String>> = row.try_get("target_account_ids")?;
    let payload: Option<Json<ContactPayload>> = row.try_get("contact_payload")?;

    let target_account_ids = targets
        .into_iter()
        .map(AccountId::new)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| corrupt("target_account_ids", e))?;

    Ok(SyncOperation {
        sync_id: SyncId::from_uuid(row.try_get("sync_id")?),
        event_id: EventId::new(event_id).map_err(|e| corrupt("event_id", e))?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        initiating_principal: row.try_get("initiating_principal")?,
        contact_kind: contact_kind
            .parse::<ContactKind>()
            .map_err(|e| corrupt("contact_kind", e))?,
        source_account_id: AccountId::new(source_account_id)
            .map_err(|e| corrupt("source_account_id", e))?,
        target_account_ids,
        status: status.parse::<SyncStatus>().map_err(|e| corrupt("status", e))?,
        results: BTreeMap::new(),
        contact_payload: payload.map(|Json(p)| p),
        failure_reason: row.try_get("failure_reason")?,
        expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
    })
}

fn result_from_row(row: &PgRow) -> SyncResult<AccountSyncResult> {
    let account_id: String = row.try_get("account_id")?;
    let status: String = row.try_get("status")?;
    let retry_count: i32 = row.try_get("retry_count")?;

    Ok(AccountSyncResult {
        account_id: AccountId::new(account_id).map_err(|e| corrupt("account_id", e))?,
        status: status.parse().map_err(|e| corrupt("result status", e))?,
        attempted_at: row.try_get("attempted_at")?,
        retry_count: u32::try_from(retry_count).map_err(|e| corrupt("retry_count", e))?,
        error_kind: row.try_get("error_kind")?,
        error_message: row.try_get("error_message")?,
    })
}

//! Configuration storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{Configuration, RawConfiguration};
use crate::error::SyncResult;

/// A configuration snapshot together with its store version.
#[derive(Debug, Clone)]
pub struct VersionedConfiguration {
    /// Incremented on every write. `0` means the defaults were never overwritten.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub config: Arc<Configuration>,
}

/// Store of the active sync configuration.
///
/// Readers receive an `Arc` snapshot. Writes replace the snapshot for future
/// readers only.
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    /// Read the current snapshot with its version.
    async fn read_versioned(&self) -> SyncResult<VersionedConfiguration>;

    /// Replace the configuration, returning the new version.
    async fn write(&self, config: Configuration) -> SyncResult<u64>;

    /// Read the current snapshot.
    async fn read(&self) -> SyncResult<Arc<Configuration>> {
        Ok(self.read_versioned().await?.config)
    }

    /// Validate a raw configuration and store it.
    async fn write_raw(&self, raw: RawConfiguration) -> SyncResult<u64> {
        let config = raw.validate()?;
        self.write(config).await
    }
}

/// In-memory configuration source.
#[derive(Debug)]
pub struct InMemoryConfigurationSource {
    current: RwLock<VersionedConfiguration>,
}

impl Default for InMemoryConfigurationSource {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

impl InMemoryConfigurationSource {
    /// Create a source holding `config` at version 0.
    #[must_use]
    pub fn new(config: Configuration) -> Self {
        Self {
            current: RwLock::new(VersionedConfiguration {
                version: 0,
                updated_at: Utc::now(),
                config: Arc::new(config),
            }),
        }
    }
}

#[async_trait]
impl ConfigurationSource for InMemoryConfigurationSource {
    async fn read_versioned(&self) -> SyncResult<VersionedConfiguration> {
        Ok(self.current.read().await.clone())
    }

    async fn write(&self, config: Configuration) -> SyncResult<u64> {
        let mut current = self.current.write().await;
        current.version += 1;
        current.updated_at = Utc::now();
        current.config = Arc::new(config);
        info!(version = current.version, "Sync configuration updated");
        Ok(current.version)
    }
}

#[cfg(feature = "postgres")]
pub use self::postgres::PgConfigurationSource;

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;
    use crate::error::SyncError;
    use sqlx::types::Json;
    use sqlx::{PgPool, Row};

    /// Postgres-backed configuration source.
    ///
    /// Every write inserts a new row; the highest version is current.
    #[derive(Debug, Clone)]
    pub struct PgConfigurationSource {
        pool: PgPool,
    }

    impl PgConfigurationSource {
        /// Create a source using `pool`.
        #[must_use]
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl ConfigurationSource for PgConfigurationSource {
        async fn read_versioned(&self) -> SyncResult<VersionedConfiguration> {
            let row = sqlx::query(
                r"
                SELECT version, document, updated_at
                FROM contact_sync_configurations
                ORDER BY version DESC
                LIMIT 1
                ",
            )
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Ok(VersionedConfiguration {
                    version: 0,
                    updated_at: Utc::now(),
                    config: Arc::new(Configuration::default()),
                });
            };

            let version: i64 = row.try_get("version")?;
            let Json(raw): Json<RawConfiguration> = row.try_get("document")?;
            let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
            let config = raw.validate()?;

            Ok(VersionedConfiguration {
                version: u64::try_from(version).map_err(|_| {
                    SyncError::storage(format!("negative configuration version {version}"))
                })?,
                updated_at,
                config: Arc::new(config),
            })
        }

        async fn write(&self, config: Configuration) -> SyncResult<u64> {
            let raw = config.to_raw();
            let version: i64 = sqlx::query_scalar(
                r"
                INSERT INTO contact_sync_configurations (version, document, updated_at)
                SELECT COALESCE(MAX(version), 0) + 1, $1, NOW()
                FROM contact_sync_configurations
                RETURNING version
                ",
            )
            .bind(Json(&raw))
            .fetch_one(&self.pool)
            .await?;

            info!(version, "Sync configuration updated");
            u64::try_from(version)
                .map_err(|_| SyncError::storage(format!("negative configuration version {version}")))
        }
    }
}

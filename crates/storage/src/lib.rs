//! Deployment history storage backed by a shared key-value store.
//!
//! Horizontal replicas coordinate through four kinds of keys: last-deployment
//! records, per-application processed-commit markers, per-component emitted
//! markers, and short-lived processing locks. All keys share a configurable
//! prefix so several environments can share one Redis instance.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod memory;
mod redis_store;
mod types;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use types::{CommitInfo, DeploymentRecord, RedisConfig};

/// Retention for deployment records and dedup markers.
pub const RECORD_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Errors that can occur talking to the store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Redis command or connection failure
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Stored record could not be decoded
    #[error("failed to decode stored record: {0}")]
    Decode(#[from] serde_json::Error),

    /// Storage backend is disabled or misconfigured
    #[error("storage is not configured: {0}")]
    NotConfigured(String),
}

/// Shared store for deployment records, dedup markers, and processing locks.
///
/// All operations are point get/set with TTL. There are no transactions and
/// no multi-key atomicity; the processing lock is advisory.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Store the last-deployment record for (application, cluster),
    /// overwriting any previous record.
    async fn store_deployment(&self, record: &DeploymentRecord) -> Result<(), StorageError>;

    /// Fetch the last-deployment record for (application, cluster).
    async fn get_deployment(
        &self,
        app_name: &str,
        cluster: &str,
    ) -> Result<Option<DeploymentRecord>, StorageError>;

    /// A deployment is new when no record exists for (application, cluster)
    /// or the stored record carries a different revision.
    async fn is_new_deployment(
        &self,
        app_name: &str,
        cluster: &str,
        revision: &str,
    ) -> Result<bool, StorageError> {
        Ok(self
            .get_deployment(app_name, cluster)
            .await?
            .is_none_or(|record| record.revision != revision))
    }

    /// Mark a commit as processed for a specific application and cluster.
    async fn mark_commit_processed(
        &self,
        sha: &str,
        app_name: &str,
        cluster: &str,
    ) -> Result<(), StorageError>;

    /// Check whether a commit was already processed for (application, cluster).
    async fn is_commit_processed(
        &self,
        sha: &str,
        app_name: &str,
        cluster: &str,
    ) -> Result<bool, StorageError>;

    /// Mark a commit as emitted downstream for a component.
    async fn mark_emitted(&self, sha: &str, component: &str) -> Result<(), StorageError>;

    /// Check whether a commit was already emitted downstream for a component.
    async fn is_emitted(&self, sha: &str, component: &str) -> Result<bool, StorageError>;

    /// Try to acquire the processing lock for (application, cluster, revision).
    /// Returns false when another holder already owns it. The TTL releases the
    /// lock automatically if the holder crashes.
    async fn acquire_lock(
        &self,
        app_name: &str,
        cluster: &str,
        revision: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError>;

    /// Release the processing lock if `token` still owns it.
    async fn release_lock(
        &self,
        app_name: &str,
        cluster: &str,
        revision: &str,
        token: &str,
    ) -> Result<(), StorageError>;
}

/// Build a colon-separated key under `prefix`.
pub(crate) fn build_key(prefix: &str, parts: &[&str]) -> String {
    let mut key = String::with_capacity(prefix.len() + parts.iter().map(|p| p.len() + 1).sum::<usize>());
    key.push_str(prefix);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_key_joins_parts_under_prefix() {
        assert_eq!(
            build_key("dora-metrics", &["processed", "abc1234", "app", "cluster"]),
            "dora-metrics:processed:abc1234:app:cluster"
        );
        assert_eq!(build_key("p", &[]), "p");
    }
}

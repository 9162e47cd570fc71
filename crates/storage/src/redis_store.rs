//! Redis implementation of the deployment store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::types::{DeploymentRecord, RedisConfig};
use crate::{build_key, DeploymentStore, StorageError, RECORD_TTL};

const MARKER_VALUE: &str = "processed";

/// Redis-backed deployment store shared across replicas.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a PING.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StorageError> {
        if !config.enabled {
            return Err(StorageError::NotConfigured(
                "redis storage is disabled".to_string(),
            ));
        }
        if config.address.is_empty() {
            return Err(StorageError::NotConfigured(
                "redis address is required".to_string(),
            ));
        }

        let url = if config.password.is_empty() {
            format!("redis://{}/{}", config.address, config.database)
        } else {
            format!(
                "redis://:{}@{}/{}",
                config.password, config.address, config.database
            )
        };

        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;

        info!(address = %config.address, "Connected to Redis storage");

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn record_key(&self, app_name: &str, cluster: &str) -> String {
        build_key(&self.key_prefix, &[app_name, cluster])
    }

    async fn set_marker(&self, key: String) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, MARKER_VALUE, RECORD_TTL.as_secs())
            .await?;
        Ok(())
    }

    async fn marker_exists(&self, key: String) -> Result<bool, StorageError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value.is_some())
    }
}

#[async_trait]
impl DeploymentStore for RedisStore {
    async fn store_deployment(&self, record: &DeploymentRecord) -> Result<(), StorageError> {
        let key = self.record_key(&record.application_name, &record.cluster_name);
        let data = serde_json::to_string(record)?;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(&key, data, RECORD_TTL.as_secs())
            .await?;

        debug!(
            app = %record.application_name,
            cluster = %record.cluster_name,
            revision = %record.revision,
            "Stored deployment record"
        );
        Ok(())
    }

    async fn get_deployment(
        &self,
        app_name: &str,
        cluster: &str,
    ) -> Result<Option<DeploymentRecord>, StorageError> {
        let key = self.record_key(app_name, cluster);
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(key).await?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn mark_commit_processed(
        &self,
        sha: &str,
        app_name: &str,
        cluster: &str,
    ) -> Result<(), StorageError> {
        self.set_marker(build_key(
            &self.key_prefix,
            &["processed", sha, app_name, cluster],
        ))
        .await
    }

    async fn is_commit_processed(
        &self,
        sha: &str,
        app_name: &str,
        cluster: &str,
    ) -> Result<bool, StorageError> {
        self.marker_exists(build_key(
            &self.key_prefix,
            &["processed", sha, app_name, cluster],
        ))
        .await
    }

    async fn mark_emitted(&self, sha: &str, component: &str) -> Result<(), StorageError> {
        self.set_marker(build_key(&self.key_prefix, &["devlake", sha, component]))
            .await
    }

    async fn is_emitted(&self, sha: &str, component: &str) -> Result<bool, StorageError> {
        self.marker_exists(build_key(&self.key_prefix, &["devlake", sha, component]))
            .await
    }

    async fn acquire_lock(
        &self,
        app_name: &str,
        cluster: &str,
        revision: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let key = build_key(&self.key_prefix, &["lock", app_name, cluster, revision]);
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_lock(
        &self,
        app_name: &str,
        cluster: &str,
        revision: &str,
        token: &str,
    ) -> Result<(), StorageError> {
        let key = build_key(&self.key_prefix, &["lock", app_name, cluster, revision]);
        let mut conn = self.conn.clone();
        // Check-then-delete is not atomic, but the lock is advisory and the
        // TTL bounds the damage of a stolen release.
        let holder: Option<String> = conn.get(&key).await?;
        if holder.as_deref() == Some(token) {
            conn.del::<_, ()>(&key).await?;
        }
        Ok(())
    }
}

//! In-memory store used by tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::DeploymentRecord;
use crate::{DeploymentStore, StorageError};

/// HashMap-backed [`DeploymentStore`]. TTLs are not enforced.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<(String, String), DeploymentRecord>,
    processed: HashSet<String>,
    emitted: HashSet<String>,
    locks: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn store_deployment(&self, record: &DeploymentRecord) -> Result<(), StorageError> {
        self.inner.lock().unwrap().records.insert(
            (
                record.application_name.clone(),
                record.cluster_name.clone(),
            ),
            record.clone(),
        );
        Ok(())
    }

    async fn get_deployment(
        &self,
        app_name: &str,
        cluster: &str,
    ) -> Result<Option<DeploymentRecord>, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .records
            .get(&(app_name.to_string(), cluster.to_string()))
            .cloned())
    }

    async fn mark_commit_processed(
        &self,
        sha: &str,
        app_name: &str,
        cluster: &str,
    ) -> Result<(), StorageError> {
        self.inner
            .lock()
            .unwrap()
            .processed
            .insert(format!("{sha}:{app_name}:{cluster}"));
        Ok(())
    }

    async fn is_commit_processed(
        &self,
        sha: &str,
        app_name: &str,
        cluster: &str,
    ) -> Result<bool, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .processed
            .contains(&format!("{sha}:{app_name}:{cluster}")))
    }

    async fn mark_emitted(&self, sha: &str, component: &str) -> Result<(), StorageError> {
        self.inner
            .lock()
            .unwrap()
            .emitted
            .insert(format!("{sha}:{component}"));
        Ok(())
    }

    async fn is_emitted(&self, sha: &str, component: &str) -> Result<bool, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .emitted
            .contains(&format!("{sha}:{component}")))
    }

    async fn acquire_lock(
        &self,
        app_name: &str,
        cluster: &str,
        revision: &str,
        token: &str,
        _ttl: Duration,
    ) -> Result<bool, StorageError> {
        let key = format!("{app_name}:{cluster}:{revision}");
        let mut inner = self.inner.lock().unwrap();
        if inner.locks.contains_key(&key) {
            return Ok(false);
        }
        inner.locks.insert(key, token.to_string());
        Ok(true)
    }

    async fn release_lock(
        &self,
        app_name: &str,
        cluster: &str,
        revision: &str,
        token: &str,
    ) -> Result<(), StorageError> {
        let key = format!("{app_name}:{cluster}:{revision}");
        let mut inner = self.inner.lock().unwrap();
        if inner.locks.get(&key).map(String::as_str) == Some(token) {
            inner.locks.remove(&key);
        }
        Ok(())
    }
}

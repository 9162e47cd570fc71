//! Persisted record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A commit attributed to a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full or abbreviated commit hash
    pub sha: String,

    /// Commit message from the code host
    pub message: String,

    /// Normalized repository URL the commit belongs to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo_url: String,

    /// Authoring timestamp from the code host. Required for emission;
    /// commits without one are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// The last-deployment record stored per (application, cluster).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Full application name as seen by the GitOps controller
    pub application_name: String,

    /// Namespace the application lives in
    pub namespace: String,

    /// Component name parsed out of the application name
    pub component_name: String,

    /// Cluster name parsed out of the application name
    pub cluster_name: String,

    /// Git revision that was deployed
    pub revision: String,

    /// Container images of the deployment
    pub images: Vec<String>,

    /// Commit hashes attributed to the deployment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commit_history: Vec<String>,

    /// When the deployment occurred
    pub deployed_at: DateTime<Utc>,

    /// Detected environment (e.g. "production")
    pub environment: String,

    /// Application health at deployment time
    #[serde(default)]
    pub health: String,

    /// When this record was written
    pub timestamp: DateTime<Utc>,
}

/// Redis connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Whether Redis storage is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Server address (host:port)
    #[serde(default)]
    pub address: String,

    /// Optional password
    #[serde(default)]
    pub password: String,

    /// Database number (0-15)
    #[serde(default)]
    pub database: i64,

    /// Prefix for every key written by this service
    #[serde(default)]
    pub key_prefix: String,
}

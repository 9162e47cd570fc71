//! Typed Argo CD `Application` resource.
//!
//! Only the fields the pipeline reads are declared; everything else in the
//! object is ignored during deserialization.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Argo CD `Application` spec. The pipeline only needs the source reference
/// for repository resolution.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "argoproj.io", version = "v1alpha1", kind = "Application")]
#[kube(namespaced)]
#[kube(status = "ApplicationStatus")]
pub struct ApplicationSpec {
    /// Argo CD project the application belongs to
    #[serde(default)]
    pub project: String,

    /// Declared source of the application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ApplicationSource>,
}

/// Source repository reference.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct ApplicationSource {
    /// Repository URL
    #[serde(rename = "repoURL", default)]
    pub repo_url: String,

    /// Path within the repository
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Target revision (branch, tag, or commit)
    #[serde(rename = "targetRevision", default, skip_serializing_if = "String::is_empty")]
    pub target_revision: String,
}

/// Observed application state.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct ApplicationStatus {
    /// Sync comparison state
    #[serde(default)]
    pub sync: SyncStatus,

    /// Aggregated health
    #[serde(default)]
    pub health: HealthStatus,

    /// Resource summary (images, URLs)
    #[serde(default)]
    pub summary: ApplicationSummary,

    /// Rolling deployment history, oldest first
    #[serde(default)]
    pub history: Vec<RevisionHistory>,
}

/// Sync state: Synced, OutOfSync, or Unknown, plus the revision the
/// controller most recently attempted to apply.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct SyncStatus {
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub revision: String,
}

/// Health state: Healthy, Progressing, Degraded, Missing, Suspended, Unknown.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
}

/// Summary of rendered resources.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct ApplicationSummary {
    /// Container images referenced by the application
    #[serde(default)]
    pub images: Vec<String>,
}

/// One prior deployment of the application.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct RevisionHistory {
    /// History entry ID
    #[serde(default)]
    pub id: i64,

    /// Revision that was deployed
    #[serde(default)]
    pub revision: String,

    /// When the deployment finished
    #[serde(rename = "deployedAt", default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,

    /// Source the revision was deployed from
    #[serde(default)]
    pub source: ApplicationSource,
}

impl Application {
    /// Sync revision, empty when the controller has not reported one.
    #[must_use]
    pub fn sync_revision(&self) -> &str {
        self.status
            .as_ref()
            .map_or("", |status| status.sync.revision.as_str())
    }

    /// Sync status string ("" when absent).
    #[must_use]
    pub fn sync_status(&self) -> &str {
        self.status
            .as_ref()
            .map_or("", |status| status.sync.status.as_str())
    }

    /// Health status string ("" when absent).
    #[must_use]
    pub fn health_status(&self) -> &str {
        self.status
            .as_ref()
            .map_or("", |status| status.health.status.as_str())
    }

    /// Images from the status summary.
    #[must_use]
    pub fn images(&self) -> Vec<String> {
        self.status
            .as_ref()
            .map(|status| status.summary.images.clone())
            .unwrap_or_default()
    }

    /// Deployment history entries.
    #[must_use]
    pub fn history(&self) -> &[RevisionHistory] {
        self.status
            .as_ref()
            .map_or(&[], |status| status.history.as_slice())
    }

    /// Repository URL recorded in history for `sha`, if any.
    #[must_use]
    pub fn repo_url_from_history(&self, sha: &str) -> Option<&str> {
        self.history()
            .iter()
            .find(|entry| entry.revision == sha && !entry.source.repo_url.is_empty())
            .map(|entry| entry.source.repo_url.as_str())
    }
}

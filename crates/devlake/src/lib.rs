//! DevLake webhook integration: payload types and multi-project fan-out.
//!
//! Deployments go to the global project plus every team project whose
//! component list matches; issues and issue-close calls go to the global
//! project only.

use async_trait::async_trait;
use thiserror::Error;

mod client;
mod types;

pub use client::{component_from_display_title, DevLakeClient, DevLakeConfig, TeamConfig};
pub use types::{format_date, Deployment, DeploymentCommit, Issue};

/// Errors returned by the fan-out client.
#[derive(Debug, Error)]
pub enum DevLakeError {
    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the webhook API
    #[error("DevLake API returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    /// `DEVLAKE_WEBHOOK_TOKEN` is not set
    #[error("DEVLAKE_WEBHOOK_TOKEN environment variable is not set")]
    MissingToken,

    /// Integration disabled in configuration
    #[error("devlake integration is disabled")]
    Disabled,

    /// Every target project rejected the payload
    #[error("failed to send deployment to all projects: {0}")]
    AllProjectsFailed(String),
}

/// Downstream sink for deployment and incident events.
///
/// The event pipeline and the incident poller both talk to this trait so
/// tests can substitute a recording sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send_deployment(&self, deployment: &Deployment) -> Result<(), DevLakeError>;
    async fn send_issue(&self, issue: &Issue) -> Result<(), DevLakeError>;
    async fn close_issue(&self, issue_key: &str) -> Result<(), DevLakeError>;
}

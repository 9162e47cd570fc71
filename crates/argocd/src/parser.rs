//! Application name parsing and the monitor/ignore decision.
//!
//! Application names follow `<component>-<cluster>`, where the cluster is one
//! of the configured known cluster suffixes. An application without a known
//! cluster suffix cannot be monitored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::ResourceExt;

use crate::config::MonitorConfig;
use crate::resource::Application;
use crate::validator;

/// Parsed view of an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub name: String,
    pub namespace: String,
    pub environment: String,
    pub component: String,
    pub cluster: String,
    pub revision: String,
    pub deployed_at: Option<DateTime<Utc>>,
    pub health: String,
    pub images: Vec<String>,
}

/// Parses applications against the configured cluster and filter lists.
#[derive(Clone)]
pub struct Parser {
    config: Arc<MonitorConfig>,
}

impl Parser {
    #[must_use]
    pub fn new(config: Arc<MonitorConfig>) -> Self {
        Self { config }
    }

    /// Split an application name into (environment, component, cluster).
    /// Returns `None` when no known cluster suffix matches.
    ///
    /// The watched namespaces are production-only, so the environment is
    /// fixed rather than inferred from the source path.
    #[must_use]
    pub fn parse_name(&self, name: &str) -> Option<(String, String, String)> {
        let cluster = self
            .config
            .known_clusters
            .iter()
            .find(|cluster| name.ends_with(&format!("-{cluster}")))?;

        let component = name[..name.len() - cluster.len() - 1].to_string();
        Some(("production".to_string(), component, cluster.clone()))
    }

    /// Extract the parsed view of an application. `None` when the name does
    /// not yield a component and cluster.
    #[must_use]
    pub fn parse(&self, app: &Application) -> Option<ApplicationInfo> {
        let name = app.name_any();
        let (environment, component, cluster) = self.parse_name(&name)?;
        let revision = app.sync_revision().to_string();
        let deployed_at = validator::deployed_timestamp(app, &revision);

        Some(ApplicationInfo {
            namespace: app.namespace().unwrap_or_default(),
            name,
            environment,
            component,
            cluster,
            revision,
            deployed_at,
            health: app.health_status().to_string(),
            images: app.images(),
        })
    }

    /// An application is monitorable when monitoring is enabled, its
    /// namespace is watched, its component is not ignored, and its cluster
    /// suffix is known.
    #[must_use]
    pub fn should_monitor(&self, app: &Application) -> bool {
        if !self.config.enabled {
            return false;
        }

        let namespace = app.namespace().unwrap_or_default();
        if !self.config.namespaces.iter().any(|ns| *ns == namespace) {
            return false;
        }

        let Some((_, component, _)) = self.parse_name(&app.name_any()) else {
            return false;
        };

        !self
            .config
            .components_to_ignore
            .iter()
            .any(|ignored| *ignored == component)
    }
}

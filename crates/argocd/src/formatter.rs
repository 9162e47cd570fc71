//! DevLake deployment payload construction.
//!
//! Each commit is checked against (and then marked in) the per-component
//! emitted-commit marker so that the same commit reaching two clusters for
//! the same component is posted to any given project only once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use devlake::{format_date, Deployment, DeploymentCommit};
use storage::{CommitInfo, DeploymentStore};

use crate::parser::ApplicationInfo;
use crate::resource::Application;

/// Builds the external deployment payload.
pub struct Formatter {
    store: Arc<dyn DeploymentStore>,
}

impl Formatter {
    #[must_use]
    pub fn new(store: Arc<dyn DeploymentStore>) -> Self {
        Self { store }
    }

    /// Build a deployment payload, or `None` when no commits survive the
    /// per-component dedup and the zero-date filter.
    ///
    /// With `skip_emitted`, commits already posted for this component are
    /// left out. Redeploys of the same revision and failed-deployment events
    /// pass `false`: their commits were reported before, but the event itself
    /// is news.
    pub async fn format_deployment(
        &self,
        app: &Application,
        info: &ApplicationInfo,
        deployed_at: Option<DateTime<Utc>>,
        commits: &[CommitInfo],
        skip_emitted: bool,
    ) -> Option<Deployment> {
        let component = if info.component.is_empty() {
            info.name.clone()
        } else {
            info.component.clone()
        };

        let deployment_commits = self
            .build_commits(commits, deployed_at, &component, skip_emitted)
            .await;
        if deployment_commits.is_empty() {
            return None;
        }

        let result = determine_result(app);
        let deployment_id = info.revision.clone();

        let deployed_label = deployed_at
            .map(|time| time.format("%Y-%m-%d %H:%M:%S %Z").to_string())
            .unwrap_or_default();
        let display_title = format!(
            "ArgoCD Deployment | Component: {component} | Namespace: {namespace} | Revision: {revision} | Status: {result} | Deployed: {deployed_label}",
            namespace = info.namespace,
            revision = deployment_id,
        );
        let name = format!("deploy to production {deployment_id}");

        let started = earliest_started(commits, deployed_at);

        Some(Deployment {
            id: deployment_id,
            created_date: Some(format_date(deployed_at)),
            started_date: format_date(started),
            finished_date: format_date(deployed_at),
            environment: "PRODUCTION".to_string(),
            result,
            display_title: Some(display_title),
            name: Some(name),
            deployment_commits,
        })
    }

    async fn build_commits(
        &self,
        commits: &[CommitInfo],
        deployed_at: Option<DateTime<Utc>>,
        component: &str,
        skip_emitted: bool,
    ) -> Vec<DeploymentCommit> {
        let mut deployment_commits = Vec::new();

        for commit in commits {
            if skip_emitted {
                match self.store.is_emitted(&commit.sha, component).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => {
                        warn!(
                            sha = %commit.sha,
                            component = %component,
                            error = %err,
                            "Failed to check emitted-commit marker"
                        );
                    }
                }
            }

            if commit.created_at.is_none() {
                error!(
                    sha = %commit.sha,
                    "Commit has no authoring date, skipping"
                );
                continue;
            }

            deployment_commits.push(DeploymentCommit {
                repo_url: commit.repo_url.clone(),
                ref_name: commit.sha.clone(),
                started_date: format_date(commit.created_at),
                finished_date: format_date(deployed_at),
                commit_sha: commit.sha.clone(),
                commit_msg: commit.message.clone(),
                result: "SUCCESS".to_string(),
                display_title: Some(commit.message.clone()),
                name: Some(commit.message.clone()),
            });

            if let Err(err) = self.store.mark_emitted(&commit.sha, component).await {
                error!(
                    sha = %commit.sha,
                    component = %component,
                    error = %err,
                    "Failed to mark commit as emitted"
                );
            }
        }

        deployment_commits
    }
}

/// FAILED only when the application is explicitly unhealthy; the failed
/// deployment branch overrides the result separately.
fn determine_result(app: &Application) -> String {
    if app.health_status() == "Unhealthy" {
        "FAILED".to_string()
    } else {
        "SUCCESS".to_string()
    }
}

/// Earliest commit authoring date, falling back to the deployment time.
fn earliest_started(
    commits: &[CommitInfo],
    deployed_at: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    commits
        .iter()
        .filter_map(|commit| commit.created_at)
        .min()
        .or(deployed_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ApplicationSpec, ApplicationStatus, HealthStatus};
    use chrono::TimeZone;
    use storage::MemoryStore;

    fn info() -> ApplicationInfo {
        ApplicationInfo {
            name: "build-service-kflux-prd-rh02".to_string(),
            namespace: "konflux-public-production".to_string(),
            environment: "production".to_string(),
            component: "build-service".to_string(),
            cluster: "kflux-prd-rh02".to_string(),
            revision: "abc1234abc1234abc1234abc1234abc1234abc12".to_string(),
            deployed_at: None,
            health: "Healthy".to_string(),
            images: vec![],
        }
    }

    fn healthy_app() -> Application {
        let mut app = Application::new("build-service-kflux-prd-rh02", ApplicationSpec::default());
        app.status = Some(ApplicationStatus {
            health: HealthStatus {
                status: "Healthy".to_string(),
            },
            ..Default::default()
        });
        app
    }

    fn commit(sha: &str, created_at: Option<DateTime<Utc>>) -> CommitInfo {
        CommitInfo {
            sha: sha.to_string(),
            message: format!("fix: change {sha}"),
            repo_url: "https://github.com/org/build-service".to_string(),
            created_at,
        }
    }

    #[tokio::test]
    async fn formats_a_first_deployment() {
        let authored = Utc.with_ymd_and_hms(2025, 9, 19, 21, 0, 0).unwrap();
        let deployed = Utc.with_ymd_and_hms(2025, 9, 19, 22, 0, 0).unwrap();
        let formatter = Formatter::new(Arc::new(MemoryStore::new()));

        let info = info();
        let deployment = formatter
            .format_deployment(
                &healthy_app(),
                &info,
                Some(deployed),
                &[commit(&info.revision, Some(authored))],
                true,
            )
            .await
            .expect("deployment should format");

        assert_eq!(deployment.id, info.revision);
        assert_eq!(deployment.result, "SUCCESS");
        assert_eq!(deployment.environment, "PRODUCTION");
        assert_eq!(deployment.finished_date, "2025-09-19T22:00:00+00:00");
        assert_eq!(deployment.started_date, "2025-09-19T21:00:00+00:00");
        assert!(deployment
            .display_title
            .as_deref()
            .unwrap()
            .starts_with("ArgoCD Deployment | Component: build-service |"));
        assert_eq!(deployment.deployment_commits.len(), 1);

        let dc = &deployment.deployment_commits[0];
        assert_eq!(dc.commit_sha, info.revision);
        assert_eq!(dc.ref_name, info.revision);
        assert_eq!(dc.started_date, "2025-09-19T21:00:00+00:00");
        assert_eq!(dc.finished_date, "2025-09-19T22:00:00+00:00");
        assert_eq!(dc.result, "SUCCESS");
    }

    #[tokio::test]
    async fn already_emitted_commits_are_skipped() {
        let authored = Utc.with_ymd_and_hms(2025, 9, 19, 21, 0, 0).unwrap();
        let deployed = Utc.with_ymd_and_hms(2025, 9, 19, 22, 0, 0).unwrap();
        let store = Arc::new(MemoryStore::new());
        let formatter = Formatter::new(store.clone());
        let info = info();

        // First format marks the commit; the second finds nothing new.
        assert!(formatter
            .format_deployment(
                &healthy_app(),
                &info,
                Some(deployed),
                &[commit(&info.revision, Some(authored))],
                true,
            )
            .await
            .is_some());
        assert!(formatter
            .format_deployment(
                &healthy_app(),
                &info,
                Some(deployed),
                &[commit(&info.revision, Some(authored))],
                true,
            )
            .await
            .is_none());

        // A redeploy of the same revision bypasses the marker.
        assert!(formatter
            .format_deployment(
                &healthy_app(),
                &info,
                Some(deployed),
                &[commit(&info.revision, Some(authored))],
                false,
            )
            .await
            .is_some());
    }

    #[tokio::test]
    async fn commits_without_dates_are_dropped() {
        let deployed = Utc.with_ymd_and_hms(2025, 9, 19, 22, 0, 0).unwrap();
        let formatter = Formatter::new(Arc::new(MemoryStore::new()));
        let info = info();

        let deployment = formatter
            .format_deployment(
                &healthy_app(),
                &info,
                Some(deployed),
                &[commit("dddd111", None)],
                true,
            )
            .await;
        assert!(deployment.is_none());
    }

    #[tokio::test]
    async fn started_date_is_earliest_commit_date() {
        let early = Utc.with_ymd_and_hms(2025, 9, 18, 8, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 9, 19, 9, 0, 0).unwrap();
        let deployed = Utc.with_ymd_and_hms(2025, 9, 19, 22, 0, 0).unwrap();
        let formatter = Formatter::new(Arc::new(MemoryStore::new()));

        let deployment = formatter
            .format_deployment(
                &healthy_app(),
                &info(),
                Some(deployed),
                &[commit("aaaa111", Some(later)), commit("bbbb222", Some(early))],
                true,
            )
            .await
            .unwrap();

        assert_eq!(deployment.started_date, "2025-09-18T08:00:00+00:00");
        assert_eq!(deployment.finished_date, "2025-09-19T22:00:00+00:00");
    }

    #[tokio::test]
    async fn zero_deployment_time_formats_to_empty_string() {
        let authored = Utc.with_ymd_and_hms(2025, 9, 19, 21, 0, 0).unwrap();
        let formatter = Formatter::new(Arc::new(MemoryStore::new()));

        let deployment = formatter
            .format_deployment(
                &healthy_app(),
                &info(),
                None,
                &[commit("aaaa111", Some(authored))],
                true,
            )
            .await
            .unwrap();
        assert_eq!(deployment.created_date.as_deref(), Some(""));
        assert_eq!(deployment.finished_date, "");
        // The timeline still starts at the earliest commit.
        assert_eq!(deployment.started_date, "2025-09-19T21:00:00+00:00");
    }
}

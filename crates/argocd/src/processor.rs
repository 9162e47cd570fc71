//! Per-event state machine deciding whether an application update is a new
//! deployment, and producing exactly one emission when it is.
//!
//! Redundant watch events are torrential: every status oscillation redelivers
//! the object. The processor survives them with four layers: validator gates,
//! a re-fetch to close the event-to-processing gap, an advisory processing
//! lock in the shared store, and the new-or-fresh check against the last
//! stored record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kube::Api;
use tracing::{debug, error, info, warn};

use devlake::EventSink;
use storage::{DeploymentRecord, DeploymentStore};

use crate::commits::CommitProcessor;
use crate::config::MonitorConfig;
use crate::formatter::Formatter;
use crate::images;
use crate::parser::{ApplicationInfo, Parser};
use crate::resource::Application;
use crate::validator;

/// TTL of the processing lock. Short, so a crashed holder releases quickly.
const LOCK_TTL: Duration = Duration::from_secs(30);

static LOCK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Watch event kinds the pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// Handles one application event. Failures are absorbed and logged; nothing
/// propagates to the watch layer.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: EventType, app: Application);
}

/// Fetches the current state of an application, used to re-validate against
/// fresh state instead of the (possibly stale) watch snapshot.
#[async_trait]
pub trait ApplicationFetcher: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Application, kube::Error>;
}

/// [`ApplicationFetcher`] backed by the Kubernetes API.
pub struct KubeFetcher {
    client: kube::Client,
}

impl KubeFetcher {
    #[must_use]
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ApplicationFetcher for KubeFetcher {
    async fn get(&self, namespace: &str, name: &str) -> Result<Application, kube::Error> {
        let api: Api<Application> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await
    }
}

/// The deployment event processor.
pub struct EventProcessor {
    parser: Parser,
    store: Arc<dyn DeploymentStore>,
    sink: Arc<dyn EventSink>,
    commits: CommitProcessor,
    formatter: Formatter,
    fetcher: Arc<dyn ApplicationFetcher>,
}

impl EventProcessor {
    #[must_use]
    pub fn new(
        config: Arc<MonitorConfig>,
        store: Arc<dyn DeploymentStore>,
        code_host: Arc<dyn github::CodeHost>,
        sink: Arc<dyn EventSink>,
        fetcher: Arc<dyn ApplicationFetcher>,
    ) -> Self {
        Self {
            parser: Parser::new(config.clone()),
            commits: CommitProcessor::new(code_host, store.clone(), config),
            formatter: Formatter::new(store.clone()),
            store,
            sink,
            fetcher,
        }
    }

    async fn handle_modified(&self, app: Application, info: ApplicationInfo) {
        // OutOfSync with Missing health is a failed deployment; it follows a
        // parallel branch instead of being rejected by the validators.
        if app.sync_status() == "OutOfSync" && app.health_status() == "Missing" {
            info!(app = %info.name, "Processing failed deployment (OutOfSync with Missing health)");
            self.process_failed_deployment(&app, &info).await;
            return;
        }

        if !validator::should_process(&app, app.sync_revision()) {
            debug!(
                app = %info.name,
                health = %app.health_status(),
                sync = %app.sync_status(),
                "Event snapshot failed validation"
            );
            return;
        }

        // Re-fetch and re-validate; the snapshot may be minutes old by the
        // time a worker picks it up. On fetch failure fall back to the
        // snapshot, which still has to pass the same gates.
        let fresh = match self.fetcher.get(&info.namespace, &info.name).await {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(app = %info.name, error = %err, "Re-fetch failed, validating event snapshot");
                app.clone()
            }
        };

        let revision = fresh.sync_revision().to_string();
        if !validator::should_process(&fresh, &revision) {
            debug!(app = %info.name, "Fresh application state failed validation");
            return;
        }
        if !validator::is_revision_in_history(&fresh, &revision) {
            debug!(
                app = %info.name,
                revision = %revision,
                "Sync revision not in deployment history"
            );
            return;
        }

        let Some(info) = self.parser.parse(&fresh) else {
            return;
        };

        // Advisory mutual exclusion across workers and replicas. Fail-open:
        // an unreachable lock store must not stall the pipeline.
        let token = lock_token();
        match self
            .store
            .acquire_lock(&info.name, &info.cluster, &revision, &token, LOCK_TTL)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    app = %info.name,
                    revision = %revision,
                    "Deployment is being processed elsewhere"
                );
                return;
            }
            Err(err) => {
                warn!(app = %info.name, error = %err, "Lock store unavailable, proceeding unlocked");
            }
        }

        self.process_deployment(&fresh, &info).await;

        if let Err(err) = self
            .store
            .release_lock(&info.name, &info.cluster, &revision, &token)
            .await
        {
            debug!(app = %info.name, error = %err, "Failed to release processing lock");
        }
    }

    /// Decide new-or-fresh and emit. Runs under the processing lock.
    async fn process_deployment(&self, fresh: &Application, info: &ApplicationInfo) {
        let revision = &info.revision;

        let previous = match self.store.get_deployment(&info.name, &info.cluster).await {
            Ok(previous) => previous,
            Err(err) => {
                warn!(app = %info.name, error = %err, "Failed to load last deployment record");
                None
            }
        };

        let fresh_timestamp = validator::deployed_timestamp(fresh, revision);
        let is_redeploy = match &previous {
            None => false,
            Some(record) if record.revision != *revision => false,
            Some(record) => {
                // Same revision: only a strictly later deployment time makes
                // this a fresh event (a redeploy of the same commit).
                let later = fresh_timestamp.is_some_and(|ts| ts > record.deployed_at);
                if !later {
                    debug!(
                        app = %info.name,
                        revision = %revision,
                        "Deployment already recorded, dropping"
                    );
                    return;
                }
                true
            }
        };

        let deployed_at = fresh_timestamp.or_else(|| {
            warn!(
                app = %info.name,
                revision = %revision,
                "No deployment timestamp in history, falling back to now"
            );
            Some(Utc::now())
        });

        info!(
            app = %info.name,
            revision = %revision,
            redeploy = is_redeploy,
            "Processing new deployment"
        );

        let commit_history = self.commits.commit_history(fresh, info).await;
        if commit_history.is_empty() {
            info!(
                app = %info.name,
                revision = %revision,
                "No commits survived reconstruction, storing record without emitting"
            );
            self.store_record(fresh, info, deployed_at, &[]).await;
            return;
        }

        let payload = self
            .formatter
            .format_deployment(fresh, info, deployed_at, &commit_history, !is_redeploy)
            .await;

        match payload {
            Some(deployment) => {
                log_payload(&deployment);
                if let Err(err) = self.sink.send_deployment(&deployment).await {
                    error!(app = %info.name, error = %err, "Failed to fan out deployment");
                }
            }
            None => {
                info!(
                    app = %info.name,
                    revision = %revision,
                    "No new commits to include, skipping emission"
                );
            }
        }

        self.store_record(fresh, info, deployed_at, &commit_history)
            .await;
    }

    /// Failed deployments (OutOfSync + Missing) are emitted once with FAILED
    /// results; the processed-commit marker suppresses repeats until the
    /// application recovers.
    async fn process_failed_deployment(&self, app: &Application, info: &ApplicationInfo) {
        let revision = &info.revision;
        if revision.is_empty() {
            return;
        }

        match self
            .store
            .is_commit_processed(revision, &info.name, &info.cluster)
            .await
        {
            Ok(true) => {
                info!(
                    app = %info.name,
                    revision = %revision,
                    "Failed deployment already processed, skipping until recovery"
                );
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(app = %info.name, error = %err, "Failed to check processed marker");
            }
        }

        if let Err(err) = self
            .store
            .mark_commit_processed(revision, &info.name, &info.cluster)
            .await
        {
            error!(app = %info.name, error = %err, "Failed to mark failed deployment as processed");
        }

        let deployed_at = info.deployed_at.or_else(|| Some(Utc::now()));
        let commit_history = self.commits.commit_history(app, info).await;

        let Some(mut deployment) = self
            .formatter
            .format_deployment(app, info, deployed_at, &commit_history, false)
            .await
        else {
            info!(
                app = %info.name,
                "No commits found for failed deployment, skipping payload"
            );
            return;
        };

        let deployed_label = deployed_at
            .map(|time| time.format("%Y-%m-%d %H:%M:%S %Z").to_string())
            .unwrap_or_default();
        deployment.result = "FAILED".to_string();
        deployment.display_title = Some(format!(
            "Failed Deployment app: {}, component: {}, revision {} ({})",
            info.name, info.component, revision, deployed_label
        ));
        deployment.name = Some(format!("deploy to production {revision}"));

        let failure_message = format!(
            "Deployment failed for {} - OutOfSync with Missing health",
            info.name
        );
        for commit in &mut deployment.deployment_commits {
            commit.result = "FAILED".to_string();
            commit.commit_msg = failure_message.clone();
            commit.display_title = Some(failure_message.clone());
            commit.name = Some(failure_message.clone());
        }

        log_payload(&deployment);
        if let Err(err) = self.sink.send_deployment(&deployment).await {
            error!(app = %info.name, error = %err, "Failed to fan out failed deployment");
        }

        let record = DeploymentRecord {
            application_name: info.name.clone(),
            namespace: info.namespace.clone(),
            component_name: info.component.clone(),
            cluster_name: info.cluster.clone(),
            revision: revision.clone(),
            images: info.images.clone(),
            commit_history: vec![revision.clone()],
            deployed_at: deployed_at.unwrap_or_else(Utc::now),
            environment: info.environment.clone(),
            health: info.health.clone(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self.store.store_deployment(&record).await {
            error!(app = %info.name, error = %err, "Failed to store failed deployment record");
        }

        info!(app = %info.name, revision = %revision, "Processed failed deployment");
    }

    async fn store_record(
        &self,
        app: &Application,
        info: &ApplicationInfo,
        deployed_at: Option<chrono::DateTime<Utc>>,
        commit_history: &[storage::CommitInfo],
    ) {
        let record = DeploymentRecord {
            application_name: info.name.clone(),
            namespace: info.namespace.clone(),
            component_name: info.component.clone(),
            cluster_name: info.cluster.clone(),
            revision: info.revision.clone(),
            images: images::extract_valid_images(&info.images),
            commit_history: commit_history.iter().map(|c| c.sha.clone()).collect(),
            deployed_at: deployed_at.unwrap_or_else(Utc::now),
            environment: info.environment.clone(),
            health: app.health_status().to_string(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self.store.store_deployment(&record).await {
            error!(app = %info.name, error = %err, "Failed to store deployment record");
        }
    }
}

#[async_trait]
impl EventHandler for EventProcessor {
    async fn handle_event(&self, event: EventType, app: Application) {
        // ADDED floods every watch (re)start with the full inventory.
        if event == EventType::Added {
            return;
        }

        let Some(info) = self.parser.parse(&app) else {
            return;
        };
        if !self.parser.should_monitor(&app) {
            return;
        }

        match event {
            EventType::Modified => self.handle_modified(app, info).await,
            EventType::Deleted => {
                info!(app = %info.name, namespace = %info.namespace, "Application deleted");
            }
            EventType::Added => unreachable!(),
        }
    }
}

fn lock_token() -> String {
    format!(
        "{}:{}",
        std::process::id(),
        LOCK_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

fn log_payload(deployment: &devlake::Deployment) {
    match serde_json::to_string(deployment) {
        Ok(json) => info!(payload = %json, "DevLake deployment payload"),
        Err(err) => error!(error = %err, "Failed to serialize deployment payload"),
    }
}

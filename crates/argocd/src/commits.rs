//! Commit reconstruction for a deployment.
//!
//! The sync revision always seeds the commit set. Image tags contribute
//! either their own commits (first deployment) or the compare range between
//! the previous and current tag (subsequent deployments). Commits from
//! blacklisted repositories are filtered out last.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use github::CodeHost;
use storage::{CommitInfo, DeploymentStore};

use crate::config::MonitorConfig;
use crate::images;
use crate::parser::ApplicationInfo;
use crate::resource::Application;

/// Normalize a repository URL for comparison and emission: lowercase, no
/// `.git` suffix, no trailing slash, `https://` scheme.
#[must_use]
pub fn normalize_repo_url(repo_url: &str) -> String {
    if repo_url.is_empty() {
        return String::new();
    }
    let mut normalized = repo_url.to_lowercase();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    if let Some(stripped) = normalized.strip_suffix(".git") {
        normalized = stripped.to_string();
    }
    while normalized.ends_with('/') {
        normalized.pop();
    }
    if let Some(rest) = normalized.strip_prefix("http://") {
        normalized = format!("https://{rest}");
    }
    normalized
}

/// Reconstructs the commits attributed to a deployment.
pub struct CommitProcessor {
    code_host: Arc<dyn CodeHost>,
    store: Arc<dyn DeploymentStore>,
    config: Arc<MonitorConfig>,
}

impl CommitProcessor {
    #[must_use]
    pub fn new(
        code_host: Arc<dyn CodeHost>,
        store: Arc<dyn DeploymentStore>,
        config: Arc<MonitorConfig>,
    ) -> Self {
        Self {
            code_host,
            store,
            config,
        }
    }

    /// Build the (possibly empty) commit set for a deployment.
    pub async fn commit_history(&self, app: &Application, info: &ApplicationInfo) -> Vec<CommitInfo> {
        if info.revision.is_empty() {
            return Vec::new();
        }

        let valid_images = images::extract_valid_images(&info.images);
        if valid_images.is_empty() {
            warn!(
                app = %info.name,
                "No commit-pinned images found, only the sync revision commit will be attributed"
            );
        }

        let mut commits = Vec::new();
        let mut seen = HashSet::new();

        // The sync revision itself is always attributed. Without its
        // authoring date the whole emission fails the has-commits check.
        let Some(revision_commit) = self
            .revision_commit(app, &info.revision, Some(&self.config.fallback_repo_url))
            .await
        else {
            return Vec::new();
        };
        seen.insert(revision_commit.sha.clone());
        commits.push(revision_commit);

        let previous = match self.store.get_deployment(&info.name, &info.cluster).await {
            Ok(previous) => previous,
            Err(err) => {
                warn!(app = %info.name, error = %err, "Failed to load previous deployment record");
                None
            }
        };

        match previous {
            None => {
                debug!(
                    app = %info.name,
                    cluster = %info.cluster,
                    "No previous deployment record, attributing current image commits"
                );
                for image in &valid_images {
                    let Some(tag) = images::extract_tag(image) else {
                        continue;
                    };
                    if seen.contains(tag) {
                        continue;
                    }
                    if let Some(commit) = self.image_commit(app, tag).await {
                        seen.insert(commit.sha.clone());
                        commits.push(commit);
                    }
                }
            }
            Some(previous) => {
                debug!(
                    app = %info.name,
                    cluster = %info.cluster,
                    "Previous deployment record found, walking changed image ranges"
                );
                let changed = images::find_changed_images(&valid_images, &previous.images);
                for image in &changed {
                    match self.image_range(app, image, &previous.images).await {
                        Ok(range) => {
                            for mut commit in range {
                                if seen.contains(&commit.sha) {
                                    continue;
                                }
                                commit.repo_url = normalize_repo_url(&commit.repo_url);
                                seen.insert(commit.sha.clone());
                                commits.push(commit);
                            }
                        }
                        Err(err) => {
                            warn!(image = %image, error = %err, "Failed to get commit history for image");
                        }
                    }
                }
            }
        }

        self.filter_blacklisted(commits)
    }

    /// Resolve, describe, and date the sync revision commit.
    async fn revision_commit(
        &self,
        app: &Application,
        revision: &str,
        fallback: Option<&str>,
    ) -> Option<CommitInfo> {
        let repo_url = self.resolve_repository(app, revision, fallback).await?;

        let message = match self.code_host.commit_message(revision, &repo_url).await {
            Some(message) if !message.is_empty() => message,
            _ => fallback_message(revision),
        };

        let Some(created_at) = self.code_host.commit_date(revision, &repo_url).await else {
            error!(
                sha = %revision,
                repo = %repo_url,
                "Could not get commit date, dropping commit"
            );
            return None;
        };

        Some(CommitInfo {
            sha: revision.to_string(),
            message,
            repo_url: normalize_repo_url(&repo_url),
            created_at: Some(created_at),
        })
    }

    /// Build a commit for an image tag, skipping it when no repository or
    /// authoring date can be found.
    async fn image_commit(&self, app: &Application, tag: &str) -> Option<CommitInfo> {
        let Some(repo_url) = self.resolve_repository(app, tag, None).await else {
            warn!(sha = %tag, "Skipping commit, no repository found");
            return None;
        };

        let message = match self.code_host.commit_message(tag, &repo_url).await {
            Some(message) if !message.is_empty() => message,
            _ => fallback_message(tag),
        };

        let Some(created_at) = self.code_host.commit_date(tag, &repo_url).await else {
            error!(sha = %tag, repo = %repo_url, "Could not get commit date, dropping commit");
            return None;
        };

        Some(CommitInfo {
            sha: tag.to_string(),
            message,
            repo_url: normalize_repo_url(&repo_url),
            created_at: Some(created_at),
        })
    }

    /// Commits between the previous and current tag of a changed image.
    async fn image_range(
        &self,
        app: &Application,
        image: &str,
        previous_images: &[String],
    ) -> Result<Vec<CommitInfo>, github::GithubError> {
        let Some(current_tag) = images::extract_tag(image) else {
            return Ok(Vec::new());
        };
        let Some(previous_tag) = images::previous_tag_for(image, previous_images) else {
            debug!(image = %image, "No previous tag for base image");
            return Ok(Vec::new());
        };

        let Some(repo_url) = self.resolve_repository(app, current_tag, None).await else {
            return Ok(Vec::new());
        };

        self.code_host
            .compare(&previous_tag, current_tag, &repo_url)
            .await
    }

    /// Repository resolution order: deployment history (no network), then
    /// code-host search, then the configured fallback (if any).
    async fn resolve_repository(
        &self,
        app: &Application,
        sha: &str,
        fallback: Option<&str>,
    ) -> Option<String> {
        if let Some(repo_url) = app.repo_url_from_history(sha) {
            debug!(sha = %sha, repo = %repo_url, "Found repository in deployment history");
            return Some(repo_url.to_string());
        }

        match self.code_host.find_repository_for_commit(sha).await {
            Ok(repo_url) => {
                info!(sha = %sha, repo = %repo_url, "Found repository via code-host search");
                Some(repo_url)
            }
            Err(err) => {
                warn!(sha = %sha, error = %err, "Failed to find repository for commit");
                fallback.map(|repo_url| {
                    warn!(sha = %sha, repo = %repo_url, "Using fallback repository");
                    repo_url.to_string()
                })
            }
        }
    }

    /// Drop commits whose normalized repository URL is blacklisted.
    fn filter_blacklisted(&self, commits: Vec<CommitInfo>) -> Vec<CommitInfo> {
        if self.config.repository_blacklist.is_empty() {
            return commits;
        }
        let blacklist: HashSet<String> = self
            .config
            .repository_blacklist
            .iter()
            .map(|url| normalize_repo_url(url))
            .collect();

        commits
            .into_iter()
            .filter(|commit| {
                let blocked = blacklist.contains(&normalize_repo_url(&commit.repo_url));
                if blocked {
                    debug!(sha = %commit.sha, repo = %commit.repo_url, "Dropping blacklisted commit");
                }
                !blocked
            })
            .collect()
    }
}

fn fallback_message(sha: &str) -> String {
    if sha.len() >= 8 {
        format!("Commit {}", &sha[..8])
    } else {
        format!("Commit {sha}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    use github::{CodeHost, GithubError};
    use storage::{DeploymentRecord, MemoryStore};

    use crate::parser::ApplicationInfo;
    use crate::resource::{
        ApplicationSource, ApplicationSpec, ApplicationStatus, RevisionHistory, SyncStatus,
    };

    const REVISION: &str = "aaaaaaa1";
    const REPO: &str = "https://github.com/org/build-service";

    #[derive(Default)]
    struct ScriptedHost {
        dates: HashMap<String, DateTime<Utc>>,
        repos: HashMap<String, String>,
        ranges: HashMap<(String, String), Vec<CommitInfo>>,
    }

    #[async_trait]
    impl CodeHost for ScriptedHost {
        async fn find_repository_for_commit(&self, sha: &str) -> Result<String, GithubError> {
            self.repos
                .get(sha)
                .cloned()
                .ok_or_else(|| GithubError::CommitNotFound(sha.to_string()))
        }

        async fn commit_message(&self, sha: &str, _repo_url: &str) -> Option<String> {
            self.dates.contains_key(sha).then(|| format!("msg {sha}"))
        }

        async fn commit_date(&self, sha: &str, _repo_url: &str) -> Option<DateTime<Utc>> {
            self.dates.get(sha).copied()
        }

        async fn compare(
            &self,
            old: &str,
            new: &str,
            _repo_url: &str,
        ) -> Result<Vec<CommitInfo>, GithubError> {
            Ok(self
                .ranges
                .get(&(old.to_string(), new.to_string()))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 19, hour, 0, 0).unwrap()
    }

    fn app_with_history() -> crate::resource::Application {
        let mut app = crate::resource::Application::new(
            "build-service-kflux-prd-rh02",
            ApplicationSpec::default(),
        );
        app.status = Some(ApplicationStatus {
            sync: SyncStatus {
                status: "Synced".to_string(),
                revision: REVISION.to_string(),
            },
            history: vec![RevisionHistory {
                revision: REVISION.to_string(),
                deployed_at: Some(ts(22)),
                source: ApplicationSource {
                    repo_url: REPO.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        });
        app
    }

    fn info_with_images(images: Vec<String>) -> ApplicationInfo {
        ApplicationInfo {
            name: "build-service-kflux-prd-rh02".to_string(),
            namespace: "konflux-public-production".to_string(),
            environment: "production".to_string(),
            component: "build-service".to_string(),
            cluster: "kflux-prd-rh02".to_string(),
            revision: REVISION.to_string(),
            deployed_at: Some(ts(22)),
            health: "Healthy".to_string(),
            images,
        }
    }

    fn processor_with(
        host: ScriptedHost,
        store: Arc<MemoryStore>,
        blacklist: Vec<String>,
    ) -> CommitProcessor {
        CommitProcessor::new(
            Arc::new(host),
            store,
            Arc::new(MonitorConfig {
                repository_blacklist: blacklist,
                ..Default::default()
            }),
        )
    }

    fn record_with_images(images: Vec<String>) -> DeploymentRecord {
        DeploymentRecord {
            application_name: "build-service-kflux-prd-rh02".to_string(),
            namespace: "konflux-public-production".to_string(),
            component_name: "build-service".to_string(),
            cluster_name: "kflux-prd-rh02".to_string(),
            revision: "0000000".to_string(),
            images,
            commit_history: vec![],
            deployed_at: ts(10),
            environment: "production".to_string(),
            health: "Healthy".to_string(),
            timestamp: ts(10),
        }
    }

    #[tokio::test]
    async fn sync_revision_always_seeds_the_result() {
        let host = ScriptedHost {
            dates: HashMap::from([(REVISION.to_string(), ts(21))]),
            ..Default::default()
        };
        let processor = processor_with(host, Arc::new(MemoryStore::new()), vec![]);

        let commits = processor
            .commit_history(&app_with_history(), &info_with_images(vec![]))
            .await;

        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].sha, REVISION);
        assert_eq!(commits[0].repo_url, REPO);
        assert_eq!(commits[0].created_at, Some(ts(21)));
    }

    #[tokio::test]
    async fn missing_revision_date_empties_the_result() {
        // No date scripted for the sync revision.
        let processor = processor_with(ScriptedHost::default(), Arc::new(MemoryStore::new()), vec![]);

        let commits = processor
            .commit_history(&app_with_history(), &info_with_images(vec![]))
            .await;
        assert!(commits.is_empty());
    }

    #[tokio::test]
    async fn first_deployment_attributes_image_commits() {
        let host = ScriptedHost {
            dates: HashMap::from([
                (REVISION.to_string(), ts(21)),
                ("bbbbbbb2".to_string(), ts(20)),
            ]),
            repos: HashMap::from([(
                "bbbbbbb2".to_string(),
                "https://github.com/org/component".to_string(),
            )]),
            ..Default::default()
        };
        let processor = processor_with(host, Arc::new(MemoryStore::new()), vec![]);

        let commits = processor
            .commit_history(
                &app_with_history(),
                &info_with_images(vec![
                    "quay.io/org/component:bbbbbbb2".to_string(),
                    "quay.io/org/unresolvable:ccccccc3".to_string(), // no repo known
                    "quay.io/org/plain:latest".to_string(),          // not a hash tag
                ]),
            )
            .await;

        let shas: Vec<&str> = commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec![REVISION, "bbbbbbb2"]);
        assert_eq!(commits[1].repo_url, "https://github.com/org/component");
    }

    #[tokio::test]
    async fn changed_image_walks_the_compare_range() {
        let range = vec![
            CommitInfo {
                sha: "ccccccc3".to_string(),
                message: "feat: one".to_string(),
                repo_url: "https://github.com/org/component.git".to_string(),
                created_at: Some(ts(19)),
            },
            CommitInfo {
                sha: "ddddddd4".to_string(),
                message: "feat: two".to_string(),
                repo_url: "https://github.com/org/component.git".to_string(),
                created_at: Some(ts(20)),
            },
        ];
        let host = ScriptedHost {
            dates: HashMap::from([(REVISION.to_string(), ts(21))]),
            repos: HashMap::from([(
                "ddddddd4".to_string(),
                "https://github.com/org/component".to_string(),
            )]),
            ranges: HashMap::from([(
                ("bbbbbbb2".to_string(), "ddddddd4".to_string()),
                range,
            )]),
        };
        let store = Arc::new(MemoryStore::new());
        store
            .store_deployment(&record_with_images(vec![
                "quay.io/org/component:bbbbbbb2".to_string(),
            ]))
            .await
            .unwrap();
        let processor = processor_with(host, store, vec![]);

        let commits = processor
            .commit_history(
                &app_with_history(),
                &info_with_images(vec!["quay.io/org/component:ddddddd4".to_string()]),
            )
            .await;

        let shas: Vec<&str> = commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec![REVISION, "ccccccc3", "ddddddd4"]);
        // Range repo URLs come back normalized.
        assert_eq!(commits[1].repo_url, "https://github.com/org/component");
    }

    #[tokio::test]
    async fn blacklisted_repositories_are_elided() {
        let range = vec![
            CommitInfo {
                sha: "ccccccc3".to_string(),
                message: "feat: keep".to_string(),
                repo_url: "https://github.com/org/component".to_string(),
                created_at: Some(ts(19)),
            },
            CommitInfo {
                sha: "eeeeeee5".to_string(),
                message: "chore: blocked".to_string(),
                repo_url: "https://github.com/org/blocked-repo".to_string(),
                created_at: Some(ts(18)),
            },
        ];
        let host = ScriptedHost {
            dates: HashMap::from([(REVISION.to_string(), ts(21))]),
            repos: HashMap::from([(
                "ddddddd4".to_string(),
                "https://github.com/org/component".to_string(),
            )]),
            ranges: HashMap::from([(
                ("bbbbbbb2".to_string(), "ddddddd4".to_string()),
                range,
            )]),
        };
        let store = Arc::new(MemoryStore::new());
        store
            .store_deployment(&record_with_images(vec![
                "quay.io/org/component:bbbbbbb2".to_string(),
            ]))
            .await
            .unwrap();
        // Blacklist entry uses a non-normalized variant on purpose.
        let processor = processor_with(
            host,
            store,
            vec!["https://github.com/Org/Blocked-Repo.git/".to_string()],
        );

        let commits = processor
            .commit_history(
                &app_with_history(),
                &info_with_images(vec!["quay.io/org/component:ddddddd4".to_string()]),
            )
            .await;

        let shas: Vec<&str> = commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec![REVISION, "ccccccc3"]);
    }

    #[test]
    fn normalize_is_idempotent() {
        let url = "HTTP://GitHub.com/Org/Repo.git/";
        let once = normalize_repo_url(url);
        assert_eq!(once, "https://github.com/org/repo");
        assert_eq!(normalize_repo_url(&once), once);
    }

    #[test]
    fn normalize_variants_collapse() {
        for variant in [
            "https://github.com/org/repo",
            "https://github.com/org/repo.git",
            "https://github.com/org/repo/",
            "http://github.com/org/repo",
            "https://GITHUB.com/org/REPO",
        ] {
            assert_eq!(normalize_repo_url(variant), "https://github.com/org/repo");
        }
        assert_eq!(normalize_repo_url(""), "");
    }

    #[test]
    fn fallback_message_truncates_long_hashes() {
        assert_eq!(fallback_message("abcdef1234567890"), "Commit abcdef12");
        assert_eq!(fallback_message("abc1234"), "Commit abc1234");
    }
}

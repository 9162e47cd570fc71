//! GitHub REST implementation of [`CodeHost`].
//!
//! The code host sits behind aggressive rate limits, so commit lookups are
//! cached in-process and transient failures are retried with a short
//! backoff before giving up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use storage::CommitInfo;

use crate::{parse_repo_url, CodeHost, GithubError};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("dora-bridge/", env!("CARGO_PKG_VERSION"));

/// Attempts per request; retries cover transport errors and 5xx responses.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// GitHub client configuration.
#[derive(Debug, Clone, Default)]
pub struct GithubConfig {
    /// Personal access token. Unauthenticated requests are allowed but
    /// rate-limited hard by the API.
    pub token: String,

    /// API base URL override (GitHub Enterprise); empty means api.github.com.
    pub base_url: String,
}

#[derive(Clone)]
struct CachedCommit {
    message: String,
    date: Option<DateTime<Utc>>,
}

/// GitHub REST API client.
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
    /// (sha, repo) -> commit metadata, so a commit referenced by several
    /// images and the sync revision costs one API call.
    commit_cache: Mutex<HashMap<(String, String), Arc<CachedCommit>>>,
    /// sha -> repository URL from commit search.
    repo_cache: Mutex<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct CommitSearchResponse {
    #[serde(default)]
    items: Vec<CommitSearchItem>,
}

#[derive(Deserialize)]
struct CommitSearchItem {
    repository: SearchRepository,
}

#[derive(Deserialize)]
struct SearchRepository {
    html_url: String,
}

#[derive(Deserialize)]
struct RepoCommit {
    sha: String,
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: String,
    author: Option<CommitSignature>,
    committer: Option<CommitSignature>,
}

#[derive(Deserialize)]
struct CommitSignature {
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CompareResponse {
    #[serde(default)]
    commits: Vec<RepoCommit>,
}

impl RepoCommit {
    /// Authoring date preferred, committer date as fallback.
    fn date(&self) -> Option<DateTime<Utc>> {
        self.commit
            .author
            .as_ref()
            .and_then(|sig| sig.date)
            .or_else(|| self.commit.committer.as_ref().and_then(|sig| sig.date))
    }
}

impl GithubClient {
    /// Build a client. Fails only if reqwest cannot construct its TLS stack.
    pub fn new(config: &GithubConfig) -> Result<Self, GithubError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if !config.token.is_empty() {
            if let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {}", config.token)) {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        let base_url = if config.base_url.is_empty() {
            DEFAULT_API_BASE.to_string()
        } else {
            config.base_url.trim_end_matches('/').to_string()
        };

        Ok(Self {
            http,
            base_url,
            commit_cache: Mutex::new(HashMap::new()),
            repo_cache: Mutex::new(HashMap::new()),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, GithubError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self.http.get(&url).send().await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await?);
                    }
                    let body = response.text().await.unwrap_or_default();
                    if status.is_server_error() && attempt < RETRY_ATTEMPTS {
                        debug!(url = %url, %status, attempt, "Server error, retrying");
                        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                        continue;
                    }
                    return Err(GithubError::Api { status, body });
                }
                Err(err) if attempt < RETRY_ATTEMPTS => {
                    debug!(url = %url, error = %err, attempt, "Request failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Commit metadata through the cache.
    async fn cached_commit(
        &self,
        sha: &str,
        repo_url: &str,
    ) -> Result<Arc<CachedCommit>, GithubError> {
        if sha.is_empty() {
            return Err(GithubError::EmptySha);
        }
        let key = (sha.to_string(), repo_url.to_string());
        if let Some(cached) = self.commit_cache.lock().await.get(&key) {
            return Ok(cached.clone());
        }

        let (owner, repo) = parse_repo_url(repo_url)
            .ok_or_else(|| GithubError::InvalidRepoUrl(repo_url.to_string()))?;
        let commit: RepoCommit = self
            .get_json(format!(
                "{}/repos/{owner}/{repo}/commits/{sha}",
                self.base_url
            ))
            .await?;

        let cached = Arc::new(CachedCommit {
            date: commit.date(),
            message: commit.commit.message,
        });
        self.commit_cache.lock().await.insert(key, cached.clone());
        Ok(cached)
    }
}

#[async_trait]
impl CodeHost for GithubClient {
    async fn find_repository_for_commit(&self, sha: &str) -> Result<String, GithubError> {
        if sha.is_empty() {
            return Err(GithubError::EmptySha);
        }
        if let Some(repo_url) = self.repo_cache.lock().await.get(sha) {
            return Ok(repo_url.clone());
        }

        let url = format!(
            "{}/search/commits?q=hash:{sha}&sort=indexed&order=desc&per_page=10",
            self.base_url
        );
        let result: CommitSearchResponse = self.get_json(url).await?;

        if result.items.is_empty() {
            return Err(GithubError::CommitNotFound(sha.to_string()));
        }

        // Prefer the component repository over the GitOps aggregation repo,
        // which indexes the same commits as merge targets.
        let repo_url = result
            .items
            .iter()
            .map(|item| item.repository.html_url.as_str())
            .find(|url| !url.contains("infra-deployments"))
            .unwrap_or(result.items[0].repository.html_url.as_str())
            .to_string();

        self.repo_cache
            .lock()
            .await
            .insert(sha.to_string(), repo_url.clone());
        Ok(repo_url)
    }

    async fn commit_message(&self, sha: &str, repo_url: &str) -> Option<String> {
        match self.cached_commit(sha, repo_url).await {
            Ok(commit) => Some(commit.message.clone()),
            Err(err) => {
                warn!(sha = %sha, repo = %repo_url, error = %err, "Failed to get commit message");
                None
            }
        }
    }

    async fn commit_date(&self, sha: &str, repo_url: &str) -> Option<DateTime<Utc>> {
        match self.cached_commit(sha, repo_url).await {
            Ok(commit) => {
                if commit.date.is_none() {
                    error!(sha = %sha, "Commit has neither author nor committer date");
                }
                commit.date
            }
            Err(err) => {
                error!(sha = %sha, repo = %repo_url, error = %err, "Failed to get commit date");
                None
            }
        }
    }

    async fn compare(
        &self,
        old: &str,
        new: &str,
        repo_url: &str,
    ) -> Result<Vec<CommitInfo>, GithubError> {
        if old.is_empty() || new.is_empty() {
            return Err(GithubError::EmptySha);
        }
        let (owner, repo) = parse_repo_url(repo_url)
            .ok_or_else(|| GithubError::InvalidRepoUrl(repo_url.to_string()))?;

        let comparison: CompareResponse = self
            .get_json(format!(
                "{}/repos/{owner}/{repo}/compare/{old}...{new}",
                self.base_url
            ))
            .await?;

        debug!(
            repo = %repo_url,
            old = %old,
            new = %new,
            count = comparison.commits.len(),
            "Compared commit range"
        );

        Ok(comparison
            .commits
            .into_iter()
            .map(|commit| {
                let created_at = commit.date();
                CommitInfo {
                    sha: commit.sha,
                    message: commit.commit.message,
                    repo_url: repo_url.to_string(),
                    created_at,
                }
            })
            .collect())
    }
}

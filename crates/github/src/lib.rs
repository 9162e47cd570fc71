//! Code-host client used to reconstruct the commits behind a deployment.
//!
//! The pipeline needs four operations from the code host: validate that an
//! image tag looks like a commit hash, find the repository a commit lives in,
//! fetch a commit's message and authoring timestamp, and compare two commits
//! to get the range between them.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;

use storage::CommitInfo;

mod client;

pub use client::{GithubClient, GithubConfig};

static COMMIT_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-fA-F0-9]{7,40}$").expect("valid commit hash pattern"));

/// True when `candidate` is a 7-40 character hex string.
#[must_use]
pub fn is_valid_commit_hash(candidate: &str) -> bool {
    COMMIT_HASH.is_match(candidate)
}

/// Errors returned by the code-host client.
#[derive(Debug, Error)]
pub enum GithubError {
    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the API
    #[error("code host returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    /// No repository contains the commit
    #[error("commit {0} not found")]
    CommitNotFound(String),

    /// Repository URL could not be parsed into owner/repo
    #[error("invalid repository URL: {0}")]
    InvalidRepoUrl(String),

    /// Empty commit hash passed to an operation that requires one
    #[error("commit SHA cannot be empty")]
    EmptySha,
}

/// Operations the commit-reconstruction engine needs from a code host.
///
/// `commit_message` and `commit_date` return `None` on any failure; callers
/// decide whether a missing value is fatal (a missing authoring date is).
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Search the code host for the repository containing `sha`.
    async fn find_repository_for_commit(&self, sha: &str) -> Result<String, GithubError>;

    /// Fetch the commit message, or `None` if unavailable.
    async fn commit_message(&self, sha: &str, repo_url: &str) -> Option<String>;

    /// Fetch the authoring timestamp, or `None` if unavailable.
    async fn commit_date(&self, sha: &str, repo_url: &str) -> Option<DateTime<Utc>>;

    /// List the commits in the range `(old, new]` on `repo_url`.
    async fn compare(
        &self,
        old: &str,
        new: &str,
        repo_url: &str,
    ) -> Result<Vec<CommitInfo>, GithubError>;
}

/// Extract (owner, repo) from a repository URL, tolerating a `.git` suffix.
#[must_use]
pub fn parse_repo_url(url: &str) -> Option<(String, String)> {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = trimmed.rsplit('/');
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let owner = parts.next().filter(|s| !s.is_empty())?;
    Some((owner.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_hash_length_boundaries() {
        assert!(!is_valid_commit_hash("abc123")); // 6
        assert!(is_valid_commit_hash("abc1234")); // 7
        assert!(is_valid_commit_hash(&"a".repeat(40)));
        assert!(!is_valid_commit_hash(&"a".repeat(41)));
    }

    #[test]
    fn commit_hash_rejects_non_hex() {
        assert!(!is_valid_commit_hash("v1.2.3-release"));
        assert!(!is_valid_commit_hash("latest"));
        assert!(!is_valid_commit_hash("abc123g"));
        assert!(is_valid_commit_hash("ABC1234DEF"));
    }

    #[test]
    fn parse_repo_url_variants() {
        assert_eq!(
            parse_repo_url("https://github.com/org/build-service"),
            Some(("org".to_string(), "build-service".to_string()))
        );
        assert_eq!(
            parse_repo_url("https://github.com/org/build-service.git"),
            Some(("org".to_string(), "build-service".to_string()))
        );
        assert_eq!(
            parse_repo_url("https://github.com/org/build-service/"),
            Some(("org".to_string(), "build-service".to_string()))
        );
        assert_eq!(parse_repo_url(""), None);
    }
}

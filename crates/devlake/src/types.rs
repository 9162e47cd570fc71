//! DevLake webhook wire types.
//!
//! Field names follow the DevLake webhook plugin API; dates use the
//! `2020-01-01T12:00:00+00:00` format it requires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+00:00";

/// Format a timestamp the way DevLake expects. A missing timestamp formats
/// to the empty string and is logged; callers should have filtered those out
/// where the field is required.
#[must_use]
pub fn format_date(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(time) => time.with_timezone(&Utc).format(DATE_FORMAT).to_string(),
        None => {
            warn!("Attempted to format a missing timestamp, returning empty string");
            String::new()
        }
    }
}

/// A commit attached to a deployment payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCommit {
    pub repo_url: String,
    pub ref_name: String,
    pub started_date: String,
    pub finished_date: String,
    pub commit_sha: String,
    pub commit_msg: String,
    pub result: String,
    pub display_title: Option<String>,
    pub name: Option<String>,
}

/// A CICD deployment payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub created_date: Option<String>,
    pub started_date: String,
    pub finished_date: String,
    pub environment: String,
    pub result: String,
    pub display_title: Option<String>,
    pub name: Option<String>,
    pub deployment_commits: Vec<DeploymentCommit>,
}

/// An issue payload (incidents map onto these).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub url: String,
    pub issue_key: String,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty", default)]
    pub issue_type: String,
    /// Must be one of TODO, IN_PROGRESS, DONE.
    pub status: String,
    /// Status in the source tool (e.g. "open", "resolved").
    pub original_status: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub resolution_date: String,
    pub created_date: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub updated_date: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub severity: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub component: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_date_uses_devlake_layout() {
        let time = Utc.with_ymd_and_hms(2025, 9, 19, 22, 0, 0).unwrap();
        assert_eq!(format_date(Some(time)), "2025-09-19T22:00:00+00:00");
    }

    #[test]
    fn format_date_missing_is_empty() {
        assert_eq!(format_date(None), "");
    }

    #[test]
    fn deployment_serializes_with_wire_names() {
        let deployment = Deployment {
            id: "abc1234".to_string(),
            created_date: Some("2025-09-19T22:00:00+00:00".to_string()),
            started_date: "2025-09-19T21:00:00+00:00".to_string(),
            finished_date: "2025-09-19T22:00:00+00:00".to_string(),
            environment: "PRODUCTION".to_string(),
            result: "SUCCESS".to_string(),
            display_title: None,
            name: None,
            deployment_commits: vec![],
        };
        let json = serde_json::to_value(&deployment).unwrap();
        assert_eq!(json["createdDate"], "2025-09-19T22:00:00+00:00");
        assert_eq!(json["deploymentCommits"], serde_json::json!([]));
        assert!(json["displayTitle"].is_null());
    }

    #[test]
    fn issue_skips_empty_optional_fields() {
        let issue = Issue {
            url: String::new(),
            issue_key: "ITN-2025-00217".to_string(),
            title: "API outage".to_string(),
            description: String::new(),
            issue_type: "INCIDENT".to_string(),
            status: "TODO".to_string(),
            original_status: "open".to_string(),
            resolution_date: String::new(),
            created_date: "2025-09-19T22:00:00+00:00".to_string(),
            updated_date: String::new(),
            severity: String::new(),
            component: "konflux".to_string(),
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["issueKey"], "ITN-2025-00217");
        assert!(json.get("resolutionDate").is_none());
        assert!(json.get("url").is_none());
        assert_eq!(json["type"], "INCIDENT");
    }
}

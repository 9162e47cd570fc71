//! HTTP fan-out client for the DevLake webhook API.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::types::{Deployment, Issue};
use crate::{DevLakeError, EventSink};

/// Environment variable holding the webhook bearer token.
const ENV_WEBHOOK_TOKEN: &str = "DEVLAKE_WEBHOOK_TOKEN";

/// A team project that receives deployments for its components.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct TeamConfig {
    /// Team name, used for logging only
    pub name: String,

    /// DevLake webhook connection ID for the team project
    pub project_id: String,

    /// Components routed to this team
    #[serde(default)]
    pub argocd_components: Vec<String>,
}

/// DevLake integration settings.
#[derive(Debug, Clone, Default)]
pub struct DevLakeConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Global project: every deployment goes here.
    pub project_id: String,
    pub timeout_seconds: u64,
    pub teams: Vec<TeamConfig>,
}

/// Client that multiplexes payloads to the global project and any team
/// projects whose component list matches.
pub struct DevLakeClient {
    config: DevLakeConfig,
    http: reqwest::Client,
}

impl DevLakeClient {
    pub fn new(mut config: DevLakeConfig) -> Result<Self, DevLakeError> {
        if config.timeout_seconds == 0 {
            config.timeout_seconds = 30;
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { config, http })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// All teams whose component list contains `component`.
    #[must_use]
    pub fn teams_for_component(&self, component: &str) -> Vec<&TeamConfig> {
        if component.is_empty() {
            return Vec::new();
        }
        self.config
            .teams
            .iter()
            .filter(|team| {
                team.argocd_components
                    .iter()
                    .any(|candidate| candidate == component)
            })
            .collect()
    }

    fn webhook_token() -> Result<String, DevLakeError> {
        std::env::var(ENV_WEBHOOK_TOKEN).map_err(|_| DevLakeError::MissingToken)
    }

    async fn post_json<T: serde::Serialize>(
        &self,
        url: String,
        body: Option<&T>,
    ) -> Result<(), DevLakeError> {
        let token = Self::webhook_token()?;
        let mut request = self.http.post(&url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(DevLakeError::Api { status, body });
        }
        Ok(())
    }

    async fn send_deployment_to_project(
        &self,
        deployment: &Deployment,
        project_id: &str,
        project_name: &str,
    ) -> Result<(), DevLakeError> {
        let url = format!(
            "{}/api/rest/plugins/webhook/connections/{}/deployments",
            self.config.base_url, project_id
        );
        debug!(url = %url, project = %project_name, "Posting deployment");
        self.post_json(url, Some(deployment)).await
    }
}

/// Extract the component name from a deployment display title.
///
/// The structured format `"Component: X |"` is preferred; the legacy format
/// `"component: X,"` is accepted as a fallback.
#[must_use]
pub fn component_from_display_title(display_title: Option<&str>) -> Option<String> {
    let title = display_title?;

    if let Some(idx) = title.find("Component: ") {
        let rest = &title[idx + "Component: ".len()..];
        let component = match rest.find(" |") {
            Some(end) => &rest[..end],
            None => rest,
        };
        let component = component.trim();
        if !component.is_empty() {
            return Some(component.to_string());
        }
    }

    if let Some(idx) = title.find("component: ") {
        let rest = &title[idx + "component: ".len()..];
        if let Some(end) = rest.find(',') {
            let component = rest[..end].trim();
            if !component.is_empty() {
                return Some(component.to_string());
            }
        }
    }

    None
}

#[async_trait]
impl EventSink for DevLakeClient {
    async fn send_deployment(&self, deployment: &Deployment) -> Result<(), DevLakeError> {
        if !self.config.enabled {
            return Err(DevLakeError::Disabled);
        }

        let component =
            component_from_display_title(deployment.display_title.as_deref()).unwrap_or_default();
        let teams = self.teams_for_component(&component);

        let mut failures = Vec::new();
        let mut successes = 0usize;

        if let Err(err) = self
            .send_deployment_to_project(deployment, &self.config.project_id, "global")
            .await
        {
            error!(error = %err, "Failed to send deployment to global project");
            failures.push(format!("global project: {err}"));
        } else {
            successes += 1;
        }

        for team in &teams {
            match self
                .send_deployment_to_project(deployment, &team.project_id, &team.name)
                .await
            {
                Ok(()) => {
                    successes += 1;
                    debug!(
                        team = %team.name,
                        project = %team.project_id,
                        component = %component,
                        "Deployment sent to team project"
                    );
                }
                Err(err) => {
                    error!(
                        team = %team.name,
                        project = %team.project_id,
                        error = %err,
                        "Failed to send deployment to team project"
                    );
                    failures.push(format!("team {} (project {}): {err}", team.name, team.project_id));
                }
            }
        }

        let total = 1 + teams.len();
        if failures.is_empty() {
            info!(
                projects = total,
                teams = teams.len(),
                id = %deployment.id,
                "Deployment sent to all projects"
            );
            Ok(())
        } else if successes > 0 {
            warn!(
                sent = successes,
                total = total,
                errors = ?failures,
                "Deployment sent to some projects only"
            );
            Ok(())
        } else {
            Err(DevLakeError::AllProjectsFailed(failures.join("; ")))
        }
    }

    async fn send_issue(&self, issue: &Issue) -> Result<(), DevLakeError> {
        if !self.config.enabled {
            return Err(DevLakeError::Disabled);
        }
        let url = format!(
            "{}/api/rest/plugins/webhook/connections/{}/issues",
            self.config.base_url, self.config.project_id
        );
        debug!(url = %url, issue = %issue.issue_key, status = %issue.status, "Posting issue");
        self.post_json(url, Some(issue)).await
    }

    async fn close_issue(&self, issue_key: &str) -> Result<(), DevLakeError> {
        if !self.config.enabled {
            return Err(DevLakeError::Disabled);
        }
        let url = format!(
            "{}/api/rest/plugins/webhook/connections/{}/issue/{}/close",
            self.config.base_url, self.config.project_id, issue_key
        );
        debug!(url = %url, issue = %issue_key, "Closing issue");
        self.post_json::<()>(url, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_teams(teams: Vec<TeamConfig>) -> DevLakeClient {
        DevLakeClient::new(DevLakeConfig {
            enabled: true,
            base_url: "http://devlake.local".to_string(),
            project_id: "1".to_string(),
            timeout_seconds: 5,
            teams,
        })
        .unwrap()
    }

    #[test]
    fn component_extraction_prefers_structured_format() {
        let title = "ArgoCD Deployment | Component: konflux-ui | Namespace: ns | Revision: abc | Status: SUCCESS | Deployed: now";
        assert_eq!(
            component_from_display_title(Some(title)),
            Some("konflux-ui".to_string())
        );
    }

    #[test]
    fn component_extraction_falls_back_to_legacy_format() {
        let title = "Production Deployment component: build-service, revision abc1234 (2025-09-19)";
        assert_eq!(
            component_from_display_title(Some(title)),
            Some("build-service".to_string())
        );
    }

    #[test]
    fn component_extraction_handles_missing_title() {
        assert_eq!(component_from_display_title(None), None);
        assert_eq!(component_from_display_title(Some("no component here")), None);
    }

    #[test]
    fn component_extraction_without_trailing_separator() {
        assert_eq!(
            component_from_display_title(Some("Component: konflux-ui")),
            Some("konflux-ui".to_string())
        );
    }

    #[test]
    fn teams_for_component_matches_membership() {
        let client = client_with_teams(vec![
            TeamConfig {
                name: "konflux-ui-team".to_string(),
                project_id: "3".to_string(),
                argocd_components: vec!["konflux-ui".to_string()],
            },
            TeamConfig {
                name: "build-team".to_string(),
                project_id: "4".to_string(),
                argocd_components: vec!["build-service".to_string(), "image-controller".to_string()],
            },
        ]);

        let teams = client.teams_for_component("konflux-ui");
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].project_id, "3");

        assert!(client.teams_for_component("unknown").is_empty());
        assert!(client.teams_for_component("").is_empty());
    }
}

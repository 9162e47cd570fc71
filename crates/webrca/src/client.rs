//! Incident API client with OAuth2 refresh-token authentication.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{Incident, IncidentList};
use crate::WebRcaError;

/// Default incidents endpoint.
pub const DEFAULT_API_URL: &str = "https://api.openshift.com/api/web-rca/v1/incidents";

/// SSO token endpoint for the refresh-token flow.
const DEFAULT_TOKEN_URL: &str =
    "https://sso.redhat.com/auth/realms/redhat-external/protocol/openid-connect/token";

const OAUTH_CLIENT_ID: &str = "cloud-services";
const OAUTH_GRANT_TYPE: &str = "refresh_token";

/// Page size for incident pagination.
const PAGE_SIZE: usize = 100;

/// Refresh this long before the token actually expires.
const TOKEN_REFRESH_BUFFER_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Incident API client. The access token is cached until shortly before
/// expiry and refreshed with a double-checked write lock.
pub struct WebRcaClient {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    offline_token: String,
    token: RwLock<Option<CachedToken>>,
}

impl WebRcaClient {
    pub fn new(base_url: &str, offline_token: &str) -> Result<Self, WebRcaError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            base_url: if base_url.is_empty() {
                DEFAULT_API_URL.to_string()
            } else {
                base_url.to_string()
            },
            token_url: DEFAULT_TOKEN_URL.to_string(),
            offline_token: offline_token.to_string(),
            token: RwLock::new(None),
        })
    }

    /// Fetch every incident, paging until a short page is returned.
    pub async fn all_incidents(&self) -> Result<Vec<Incident>, WebRcaError> {
        let token = self.access_token().await?;

        let mut incidents = Vec::with_capacity(PAGE_SIZE * 2);
        let mut page = 1usize;
        loop {
            let list = self.fetch_page(&token, page).await?;
            let count = list.items.len();
            incidents.extend(list.items);
            debug!(page, count, "Fetched incident page");

            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(incidents)
    }

    async fn fetch_page(&self, token: &str, page: usize) -> Result<IncidentList, WebRcaError> {
        let url = format!("{}?page={}&size={}", self.base_url, page, PAGE_SIZE);
        let response = self.http.get(&url).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WebRcaError::Api { status, body });
        }

        Ok(response.json().await?)
    }

    async fn access_token(&self) -> Result<String, WebRcaError> {
        // Fast path under the read lock.
        if let Some(token) = self.token.read().await.as_ref() {
            if Utc::now() < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        // Slow path: take the write lock and re-check, another task may have
        // refreshed while we waited.
        let mut guard = self.token.write().await;
        if let Some(token) = guard.as_ref() {
            if Utc::now() < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        *guard = Some(token);
        Ok(access_token)
    }

    async fn request_token(&self) -> Result<CachedToken, WebRcaError> {
        let params = [
            ("grant_type", OAUTH_GRANT_TYPE),
            ("client_id", OAUTH_CLIENT_ID),
            ("refresh_token", self.offline_token.as_str()),
        ];

        let response = self.http.post(&self.token_url).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WebRcaError::Token(format!(
                "token request failed with status {status}: {body}"
            )));
        }

        let token: TokenResponse = response.json().await?;
        if token.access_token.is_empty() {
            return Err(WebRcaError::Token("access token is empty".to_string()));
        }

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now()
                + ChronoDuration::seconds((token.expires_in - TOKEN_REFRESH_BUFFER_SECS).max(0)),
        })
    }
}

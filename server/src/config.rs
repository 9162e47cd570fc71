//! Configuration model and resolution.
//!
//! Precedence, lowest to highest: built-in defaults, the YAML file,
//! environment variables, command-line flags. Monitoring toggles and lists
//! are YAML-only so the deployed configuration stays declarative; flags and
//! environment variables override server settings and provide secrets.

use std::time::Duration;

use serde::Deserialize;

use devlake::{DevLakeConfig, TeamConfig};
use storage::RedisConfig;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

/// Root of the YAML configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YamlConfig {
    #[serde(default)]
    pub server: ServerYaml,
    #[serde(default)]
    pub argocd: ArgoYaml,
    #[serde(default)]
    pub webrca: WebRcaYaml,
    #[serde(default)]
    pub storage: StorageYaml,
    #[serde(default)]
    pub integration: IntegrationYaml,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerYaml {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub log_level: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArgoYaml {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub components_to_ignore: Vec<String>,
    #[serde(default)]
    pub known_clusters: Vec<String>,
    #[serde(default)]
    pub repository_blacklist: Vec<String>,
    #[serde(default)]
    pub fallback_repo_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebRcaYaml {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_url: String,
    /// Poll interval, e.g. "30m" or "1h"
    #[serde(default)]
    pub interval: String,
    /// Offline token; normally supplied via OFFLINE_TOKEN instead
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageYaml {
    #[serde(default)]
    pub redis: RedisConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegrationYaml {
    #[serde(default)]
    pub devlake: DevLakeYaml,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevLakeYaml {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub teams: Vec<TeamConfig>,
}

/// Environment variable overrides, collected once so resolution stays pure.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub port: Option<u16>,
    pub environment: Option<String>,
    pub log_level: Option<String>,
    pub offline_token: Option<String>,
    pub webrca_interval: Option<String>,
    pub redis_host: Option<String>,
    pub redis_port: Option<String>,
    pub redis_password: Option<String>,
    pub github_token: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let get = |key: &str| std::env::var(key).ok().filter(|value| !value.is_empty());
        Self {
            port: get("PORT").and_then(|value| value.parse().ok()),
            environment: get("ENVIRONMENT"),
            log_level: get("LOG_LEVEL"),
            offline_token: get("OFFLINE_TOKEN"),
            webrca_interval: get("WEBRCA_INTERVAL"),
            redis_host: get("REDIS_HOST"),
            redis_port: get("REDIS_PORT"),
            redis_password: get("REDIS_PASSWORD"),
            github_token: get("GITHUB_TOKEN"),
        }
    }
}

/// Command-line flag overrides (server settings only).
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    pub port: Option<u16>,
    pub environment: Option<String>,
    pub log_level: Option<String>,
}

/// WebRCA monitor settings after resolution.
#[derive(Debug, Clone)]
pub struct WebRcaSettings {
    pub enabled: bool,
    pub api_url: String,
    pub token: String,
    pub interval: Duration,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub environment: String,
    pub log_level: String,
    pub argocd: argocd::MonitorConfig,
    pub webrca: WebRcaSettings,
    pub redis: RedisConfig,
    pub devlake: DevLakeConfig,
    pub github_token: String,
}

/// Merge defaults, YAML, environment, and flags into the final config.
#[must_use]
pub fn resolve(yaml: YamlConfig, env: EnvOverrides, flags: FlagOverrides) -> AppConfig {
    let port = flags
        .port
        .or(env.port)
        .or(yaml.server.port)
        .unwrap_or(DEFAULT_PORT);

    let environment = flags
        .environment
        .or(env.environment)
        .unwrap_or_else(|| non_empty_or(yaml.server.environment, DEFAULT_ENVIRONMENT));

    let log_level = flags
        .log_level
        .or(env.log_level)
        .unwrap_or_else(|| non_empty_or(yaml.server.log_level, DEFAULT_LOG_LEVEL));

    let argocd = argocd::MonitorConfig {
        enabled: yaml.argocd.enabled,
        namespaces: yaml.argocd.namespaces,
        components_to_ignore: yaml.argocd.components_to_ignore,
        known_clusters: yaml.argocd.known_clusters,
        repository_blacklist: yaml.argocd.repository_blacklist,
        fallback_repo_url: non_empty_or(
            yaml.argocd.fallback_repo_url,
            argocd::config::DEFAULT_FALLBACK_REPO,
        ),
        ..Default::default()
    };

    let interval_str = non_empty_or(
        yaml.webrca.interval,
        env.webrca_interval.as_deref().unwrap_or("30m"),
    );
    let webrca = WebRcaSettings {
        enabled: yaml.webrca.enabled,
        api_url: yaml.webrca.api_url,
        token: env.offline_token.unwrap_or(yaml.webrca.token),
        interval: parse_interval(&interval_str).unwrap_or(webrca::DEFAULT_INTERVAL),
    };

    let mut redis = yaml.storage.redis;
    if let Some(password) = env.redis_password {
        redis.password = password;
    }
    match (env.redis_host, env.redis_port) {
        (Some(host), Some(port)) => redis.address = format!("{host}:{port}"),
        (Some(host), None) => redis.address = format!("{host}:6379"),
        _ => {}
    }

    let devlake = DevLakeConfig {
        enabled: yaml.integration.devlake.enabled,
        base_url: yaml.integration.devlake.base_url,
        project_id: yaml.integration.devlake.project_id,
        timeout_seconds: yaml.integration.devlake.timeout_seconds,
        teams: yaml.integration.devlake.teams,
    };

    AppConfig {
        port,
        environment,
        log_level,
        argocd,
        webrca,
        redis,
        devlake,
        github_token: env.github_token.unwrap_or_default(),
    }
}

/// Load the YAML file; a missing or unreadable file yields the defaults.
pub fn load_yaml(path: &std::path::Path) -> YamlConfig {
    let Ok(data) = std::fs::read_to_string(path) else {
        return YamlConfig::default();
    };
    serde_yaml::from_str(&data).unwrap_or_default()
}

/// Parse an interval like "90s", "30m", or "1h". A bare number is seconds.
#[must_use]
pub fn parse_interval(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let number: u64 = number.parse().ok()?;
    let seconds = match unit {
        "s" => number,
        "m" => number * 60,
        "h" => number * 3600,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

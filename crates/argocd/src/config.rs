//! Monitoring configuration for the application watcher.

/// Default number of event workers.
pub const DEFAULT_WORKERS: usize = 100;

/// Default repository attributed to a sync revision when neither the
/// deployment history nor the code host can resolve one.
pub const DEFAULT_FALLBACK_REPO: &str =
    "https://github.com/redhat-appstudio/infra-deployments.git";

/// Settings controlling which applications are watched and how commits are
/// attributed.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Whether the monitor is active
    pub enabled: bool,

    /// Namespaces to watch
    pub namespaces: Vec<String>,

    /// Components excluded from monitoring; all others are monitored
    pub components_to_ignore: Vec<String>,

    /// Known cluster suffixes used to parse application names
    pub known_clusters: Vec<String>,

    /// Repositories whose commits must never appear in emitted payloads
    pub repository_blacklist: Vec<String>,

    /// Repository attributed to the sync revision when resolution fails
    pub fallback_repo_url: String,

    /// Size of the event worker pool
    pub workers: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespaces: Vec::new(),
            components_to_ignore: Vec::new(),
            known_clusters: Vec::new(),
            repository_blacklist: Vec::new(),
            fallback_repo_url: DEFAULT_FALLBACK_REPO.to_string(),
            workers: DEFAULT_WORKERS,
        }
    }
}

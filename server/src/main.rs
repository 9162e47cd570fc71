//! DORA metrics event bridge.
//!
//! Watches GitOps-managed applications, reconstructs the commits behind each
//! deployment, and fans normalized deployment and incident events out to the
//! analytics platform.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser as ClapParser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use argocd::{EventProcessor, KubeFetcher, Watcher};
use devlake::{DevLakeClient, EventSink};
use github::{GithubClient, GithubConfig};
use storage::{DeploymentStore, RedisStore};
use webrca::{Monitor, WebRcaClient};

mod config;
mod http;

use config::{AppConfig, EnvOverrides, FlagOverrides};

/// GitOps deployment and incident event bridge for DORA analytics.
#[derive(ClapParser)]
#[command(name = "dora-bridge", version)]
struct Cli {
    /// HTTP server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Runtime environment
    #[arg(long = "env", value_parser = ["development", "production"])]
    environment: Option<String>,

    /// Log verbosity
    #[arg(long, value_parser = ["debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// Path to the YAML configuration file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let yaml = config::load_yaml(&cli.config);
    let config = config::resolve(
        yaml,
        EnvOverrides::from_env(),
        FlagOverrides {
            port: cli.port,
            environment: cli.environment,
            log_level: cli.log_level,
        },
    );

    init_tracing(&config.log_level);
    log_startup(&config);

    let mut watcher_handle = None;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut monitor_task = None;

    // The fan-out client is shared by both monitors.
    let sink: Arc<dyn EventSink> =
        Arc::new(DevLakeClient::new(config.devlake.clone()).context("devlake client")?);

    if config.argocd.enabled {
        let store: Arc<dyn DeploymentStore> = Arc::new(
            RedisStore::connect(&config.redis)
                .await
                .context("redis storage is required for application monitoring")?,
        );
        let code_host = Arc::new(
            GithubClient::new(&GithubConfig {
                token: config.github_token.clone(),
                base_url: String::new(),
            })
            .context("github client")?,
        );
        let kube_client = kube::Client::try_default()
            .await
            .context("kubernetes client")?;

        let monitor_config = Arc::new(config.argocd.clone());
        let processor = Arc::new(EventProcessor::new(
            monitor_config.clone(),
            store,
            code_host,
            sink.clone(),
            Arc::new(KubeFetcher::new(kube_client.clone())),
        ));
        let watcher = Watcher::new(kube_client.clone(), monitor_config, processor);
        watcher_handle = Some((watcher.start().context("application watcher")?, kube_client));
    }

    if config.webrca.enabled {
        if config.webrca.token.is_empty() {
            warn!("WebRCA monitoring enabled but no offline token provided, skipping");
        } else {
            let client = Arc::new(
                WebRcaClient::new(&config.webrca.api_url, &config.webrca.token)
                    .context("webrca client")?,
            );
            let monitor = Monitor::new(client, sink.clone(), config.webrca.interval);
            let rx = shutdown_rx.clone();
            monitor_task = Some(tokio::spawn(async move { monitor.run(rx).await }));
        }
    }

    let state = http::AppState {
        kube_client: watcher_handle.as_ref().map(|(_, client)| client.clone()),
        argocd: Arc::new(config.argocd.clone()),
        monitors_enabled: config.argocd.enabled || config.webrca.enabled,
        started_at: std::time::Instant::now(),
    };

    http::serve(config.port, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    // Drain monitors after the HTTP server stops accepting traffic.
    let _ = shutdown_tx.send(true);
    if let Some((mut handle, _)) = watcher_handle {
        handle.stop().await;
    }
    if let Some(task) = monitor_task {
        let _ = task.await;
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_startup(config: &AppConfig) {
    info!(
        port = config.port,
        environment = %config.environment,
        log_level = %config.log_level,
        "Starting dora-bridge"
    );

    if config.argocd.enabled {
        info!(
            namespaces = ?config.argocd.namespaces,
            known_clusters = ?config.argocd.known_clusters,
            ignored_components = ?config.argocd.components_to_ignore,
            "Application monitoring enabled"
        );
    } else {
        info!("Application monitoring disabled");
    }

    if config.webrca.enabled {
        info!(interval = ?config.webrca.interval, "Incident monitoring enabled");
    } else {
        info!("Incident monitoring disabled");
    }

    if config.devlake.enabled {
        info!(
            project_id = %config.devlake.project_id,
            teams = config.devlake.teams.len(),
            "DevLake integration enabled"
        );
    } else {
        info!("DevLake integration disabled");
    }
}

//! HTTP surface: health, readiness, and an application listing.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use kube::Api;
use serde_json::{json, Value};
use tracing::{error, warn};

use argocd::{Application, Parser};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Kubernetes client, present when application monitoring is enabled.
    pub kube_client: Option<kube::Client>,
    /// Watcher configuration, for the listing endpoint.
    pub argocd: Arc<argocd::MonitorConfig>,
    /// Whether any monitor is running, for readiness.
    pub monitors_enabled: bool,
    /// Process start, for the uptime report.
    pub started_at: std::time::Instant,
}

/// Build the router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/v1/argocd/applications", get(list_applications))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn ready(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if !state.monitors_enabled {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({ "status": "ready" })))
}

/// List watched applications with their parsed component and cluster.
async fn list_applications(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let Some(client) = &state.kube_client else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let parser = Parser::new(state.argocd.clone());
    let mut items = Vec::new();

    for namespace in &state.argocd.namespaces {
        let api: Api<Application> = Api::namespaced(client.clone(), namespace);
        let apps = match api.list(&Default::default()).await {
            Ok(apps) => apps,
            Err(err) => {
                warn!(namespace = %namespace, error = %err, "Failed to list applications");
                continue;
            }
        };

        for app in apps {
            let Some(info) = parser.parse(&app) else {
                continue;
            };
            items.push(json!({
                "name": info.name,
                "namespace": info.namespace,
                "component": info.component,
                "cluster": info.cluster,
                "environment": info.environment,
                "sync_status": app.sync_status(),
                "health_status": app.health_status(),
                "revision": info.revision,
                "images": info.images,
            }));
        }
    }

    Ok(Json(json!({ "total": items.len(), "items": items })))
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    port: u16,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server listening");

    if let Err(err) = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %err, "HTTP server error");
        return Err(err.into());
    }
    Ok(())
}

//! Periodic incident polling loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use devlake::EventSink;

use crate::client::WebRcaClient;
use crate::incidents::Incidents;

/// Default interval between polls.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Long-running incident monitor. Runs an immediate check, then one per
/// interval, until shutdown fires.
pub struct Monitor {
    client: Arc<WebRcaClient>,
    incidents: Incidents<dyn EventSink>,
    interval: Duration,
}

impl Monitor {
    #[must_use]
    pub fn new(client: Arc<WebRcaClient>, sink: Arc<dyn EventSink>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        Self {
            client,
            incidents: Incidents::new(sink),
            interval,
        }
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Starting incident monitoring");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_once().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Incident monitoring stopped");
                        return;
                    }
                }
            }
        }
    }

    async fn check_once(&self) {
        let started = std::time::Instant::now();
        match self.client.all_incidents().await {
            Ok(incidents) => {
                tracing::debug!(
                    total = incidents.len(),
                    elapsed = ?started.elapsed(),
                    "Incident fetch completed"
                );
                self.incidents.check(&incidents).await;
            }
            Err(err) => error!(error = %err, "Incident check failed"),
        }
    }
}

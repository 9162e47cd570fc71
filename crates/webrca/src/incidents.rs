//! Incident state-change detection and issue emission.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use devlake::{format_date, EventSink, Issue};

use crate::types::{Incident, IncidentState};

/// Incident URL shown in the downstream issue.
const INCIDENT_URL_BASE: &str = "https://web-rca.devshift.net/incident";

/// Outcome of processing one incident.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub is_new: bool,
    pub is_status_change: bool,
    pub is_resolved: bool,
}

/// Detects new incidents and status changes between polls and emits
/// issue upserts (and closes) through the sink.
pub struct Incidents<S: EventSink + ?Sized> {
    sink: std::sync::Arc<S>,
    state: Mutex<HashMap<String, IncidentState>>,
}

impl<S: EventSink + ?Sized> Incidents<S> {
    pub fn new(sink: std::sync::Arc<S>) -> Self {
        Self {
            sink,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Process one batch of incidents (a full poll).
    pub async fn check(&self, incidents: &[Incident]) {
        let mut new_count = 0usize;
        let mut status_changes = 0usize;
        let mut resolved_count = 0usize;
        let mut monitored = 0usize;

        for incident in incidents {
            if !incident.is_monitored() {
                continue;
            }
            monitored += 1;

            let outcome = self.process_incident(incident).await;
            new_count += usize::from(outcome.is_new);
            status_changes += usize::from(outcome.is_status_change);
            resolved_count += usize::from(outcome.is_resolved);
        }

        if new_count > 0 || status_changes > 0 || resolved_count > 0 {
            info!(
                monitored,
                new = new_count,
                status_changes,
                resolved = resolved_count,
                "Incidents processed"
            );
        } else {
            debug!(monitored, total = incidents.len(), "No incident changes");
        }
    }

    /// Decide whether one incident warrants an emission and update the
    /// in-memory state.
    pub async fn process_incident(&self, incident: &Incident) -> ProcessOutcome {
        let incident_id = incident.incident_id.clone();

        let (is_new, is_status_change, previous_status) = {
            let state = self.state.lock().unwrap();
            match state.get(&incident_id) {
                Some(prev) => (
                    !prev.processed,
                    prev.status != incident.status,
                    Some(prev.status.clone()),
                ),
                None => (true, false, None),
            }
        };
        let is_resolved = incident.is_resolved();

        if is_new || is_status_change {
            let issue = to_issue(incident);
            match self.sink.send_issue(&issue).await {
                Ok(()) => {
                    if is_new {
                        info!(incident = %incident_id, status = %incident.status, "New incident sent");
                    } else {
                        info!(
                            incident = %incident_id,
                            from = %previous_status.unwrap_or_default(),
                            to = %incident.status,
                            "Incident status change sent"
                        );
                    }
                }
                Err(err) => {
                    error!(incident = %incident_id, error = %err, "Failed to send incident");
                }
            }
        }

        if is_resolved && is_status_change {
            match self.sink.close_issue(&incident_id).await {
                Ok(()) => info!(incident = %incident_id, "Incident resolved and closed downstream"),
                Err(err) => {
                    error!(incident = %incident_id, error = %err, "Failed to close incident");
                }
            }
        }

        self.state.lock().unwrap().insert(
            incident_id.clone(),
            IncidentState {
                incident_id,
                status: incident.status.clone(),
                updated_at: incident.updated_at,
                processed: true,
            },
        );

        ProcessOutcome {
            is_new,
            is_status_change,
            is_resolved,
        }
    }
}

/// Map an incident onto the downstream issue payload.
#[must_use]
pub fn to_issue(incident: &Incident) -> Issue {
    let is_resolved = incident.is_resolved();

    let resolution_date = if is_resolved {
        resolution_timestamp(incident).map(|ts| format_date(Some(ts))).unwrap_or_default()
    } else {
        String::new()
    };

    Issue {
        url: format!("{INCIDENT_URL_BASE}/{}", incident.incident_id),
        issue_key: incident.incident_id.clone(),
        title: incident.summary.clone(),
        description: incident.description.clone(),
        issue_type: "INCIDENT".to_string(),
        status: if is_resolved { "DONE" } else { "TODO" }.to_string(),
        original_status: incident.status.to_lowercase(),
        resolution_date,
        created_date: format_date(incident.created_at),
        updated_date: incident
            .updated_at
            .map(|ts| format_date(Some(ts)))
            .unwrap_or_default(),
        severity: incident.severity.clone(),
        component: component_from_products(&incident.products),
    }
}

/// Resolution time, falling back to the last update when the API does not
/// carry an explicit one.
fn resolution_timestamp(incident: &Incident) -> Option<DateTime<Utc>> {
    incident.resolved_at.or(incident.updated_at)
}

fn component_from_products(products: &[String]) -> String {
    if products.iter().any(|p| p == crate::types::MONITORED_PRODUCT) {
        return crate::types::MONITORED_PRODUCT.to_string();
    }
    products
        .first()
        .cloned()
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use devlake::{Deployment, DevLakeError};

    #[derive(Default)]
    struct RecordingSink {
        issues: Mutex<Vec<Issue>>,
        closed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send_deployment(&self, _deployment: &Deployment) -> Result<(), DevLakeError> {
            Ok(())
        }

        async fn send_issue(&self, issue: &Issue) -> Result<(), DevLakeError> {
            self.issues.lock().unwrap().push(issue.clone());
            Ok(())
        }

        async fn close_issue(&self, issue_key: &str) -> Result<(), DevLakeError> {
            self.closed.lock().unwrap().push(issue_key.to_string());
            Ok(())
        }
    }

    fn incident(status: &str) -> Incident {
        Incident {
            id: "uuid-1".to_string(),
            incident_id: "ITN-2025-00217".to_string(),
            summary: "API outage".to_string(),
            description: "Cluster API unavailable".to_string(),
            products: vec!["konflux".to_string()],
            status: status.to_string(),
            severity: "2".to_string(),
            created_at: Some(Utc.with_ymd_and_hms(2025, 9, 19, 8, 0, 0).unwrap()),
            updated_at: Some(Utc.with_ymd_and_hms(2025, 9, 19, 9, 0, 0).unwrap()),
            resolved_at: None,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn new_incident_is_emitted_once() {
        let sink = Arc::new(RecordingSink::default());
        let incidents = Incidents::new(sink.clone());

        let outcome = incidents.process_incident(&incident("open")).await;
        assert!(outcome.is_new);
        assert!(!outcome.is_status_change);

        // Same incident next poll: no change, no emission.
        let outcome = incidents.process_incident(&incident("open")).await;
        assert!(!outcome.is_new);
        assert!(!outcome.is_status_change);

        assert_eq!(sink.issues.lock().unwrap().len(), 1);
        assert!(sink.closed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolution_emits_done_issue_and_close() {
        let sink = Arc::new(RecordingSink::default());
        let incidents = Incidents::new(sink.clone());

        incidents.process_incident(&incident("open")).await;

        let mut resolved = incident("resolved");
        resolved.resolved_at = Some(Utc.with_ymd_and_hms(2025, 9, 19, 12, 0, 0).unwrap());
        let outcome = incidents.process_incident(&resolved).await;
        assert!(outcome.is_status_change);
        assert!(outcome.is_resolved);

        let issues = sink.issues.lock().unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[1].status, "DONE");
        assert_eq!(issues[1].original_status, "resolved");
        assert_eq!(issues[1].resolution_date, "2025-09-19T12:00:00+00:00");
        assert_eq!(
            sink.closed.lock().unwrap().as_slice(),
            ["ITN-2025-00217".to_string()]
        );
    }

    #[tokio::test]
    async fn unmonitored_incidents_never_reach_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let incidents = Incidents::new(sink.clone());

        let mut other = incident("open");
        other.products = vec!["openshift".to_string()];
        incidents.check(&[other]).await;

        assert!(sink.issues.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolved_without_resolved_at_falls_back_to_updated_at() {
        let sink = Arc::new(RecordingSink::default());
        let incidents = Incidents::new(sink.clone());

        incidents.process_incident(&incident("open")).await;
        incidents.process_incident(&incident("closed")).await;

        let issues = sink.issues.lock().unwrap();
        assert_eq!(issues[1].resolution_date, "2025-09-19T09:00:00+00:00");
    }

    #[test]
    fn issue_mapping_for_open_incident() {
        let issue = to_issue(&incident("open"));
        assert_eq!(issue.issue_key, "ITN-2025-00217");
        assert_eq!(issue.status, "TODO");
        assert_eq!(issue.original_status, "open");
        assert_eq!(issue.issue_type, "INCIDENT");
        assert_eq!(issue.resolution_date, "");
        assert_eq!(issue.created_date, "2025-09-19T08:00:00+00:00");
        assert_eq!(issue.component, "konflux");
        assert!(issue.url.ends_with("/incident/ITN-2025-00217"));
    }
}

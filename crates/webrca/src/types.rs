//! Incident API types.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Product name that selects incidents for emission.
pub const MONITORED_PRODUCT: &str = "konflux";

/// Paginated response from the incidents API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentList {
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub items: Vec<Incident>,
}

/// A single incident.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Incident {
    /// Opaque unique identifier
    #[serde(default)]
    pub id: String,

    /// Human-readable identifier (e.g. "ITN-2025-00217")
    #[serde(default)]
    pub incident_id: String,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub description: String,

    /// Affected products
    #[serde(default)]
    pub products: Vec<String>,

    /// e.g. "customer_facing" or "internal"
    #[serde(default)]
    pub incident_type: String,

    /// open, investigating, resolved, closed
    #[serde(default)]
    pub status: String,

    /// Impact level, "1" (critical) through "4" (low)
    #[serde(default)]
    pub severity: String,

    /// Who opened the incident
    #[serde(default)]
    pub creator: User,

    /// Everyone involved in resolving it
    #[serde(default)]
    pub participants: Vec<User>,

    /// Chronological events, creation through resolution
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

/// A user in the incident system.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
}

/// One event on an incident's timeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelineEvent {
    #[serde(default)]
    pub id: String,
    /// e.g. "created", "status_changed", "comment_added"
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub actor: User,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Whether the incident affects the monitored product.
    #[must_use]
    pub fn is_monitored(&self) -> bool {
        self.products.iter().any(|p| p == MONITORED_PRODUCT)
    }

    /// Resolved and closed both count as resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.status.to_lowercase().as_str(),
            "resolved" | "closed"
        )
    }
}

/// Per-incident state kept between polls for change detection.
#[derive(Debug, Clone)]
pub struct IncidentState {
    pub incident_id: String,
    pub status: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub processed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitored_product_filter() {
        let incident = Incident {
            products: vec!["openshift".to_string(), "konflux".to_string()],
            ..Default::default()
        };
        assert!(incident.is_monitored());

        let other = Incident {
            products: vec!["openshift".to_string()],
            ..Default::default()
        };
        assert!(!other.is_monitored());
    }

    #[test]
    fn incident_list_deserializes_from_api_payload() {
        let body = r#"{
            "kind": "IncidentList",
            "page": 1,
            "size": 2,
            "total": 2,
            "items": [
                {
                    "id": "5f1c",
                    "incident_id": "ITN-2025-00217",
                    "summary": "API outage",
                    "description": "Cluster API unavailable",
                    "products": ["konflux"],
                    "incident_type": "customer_facing",
                    "status": "resolved",
                    "severity": "2",
                    "creator": {"id": "u1", "name": "On Call", "username": "oncall"},
                    "participants": [{"id": "u2", "username": "sre"}],
                    "timeline": [
                        {"id": "t1", "event_type": "created", "created_at": "2025-09-19T08:00:00Z"}
                    ],
                    "created_at": "2025-09-19T08:00:00Z",
                    "updated_at": "2025-09-19T12:00:00Z",
                    "resolved_at": "2025-09-19T12:00:00Z"
                },
                {
                    "id": "6a2d",
                    "incident_id": "ITN-2025-00218",
                    "summary": "Unrelated",
                    "products": ["openshift"],
                    "status": "open",
                    "created_at": "2025-09-20T08:00:00Z"
                }
            ]
        }"#;

        let list: IncidentList = serde_json::from_str(body).unwrap();
        assert_eq!(list.total, 2);
        assert_eq!(list.items.len(), 2);

        let incident = &list.items[0];
        assert_eq!(incident.incident_id, "ITN-2025-00217");
        assert!(incident.is_monitored());
        assert!(incident.is_resolved());
        assert_eq!(incident.creator.username, "oncall");
        assert_eq!(incident.participants.len(), 1);
        assert_eq!(incident.timeline[0].event_type, "created");
        assert!(incident.resolved_at.is_some());

        assert!(!list.items[1].is_monitored());
    }

    #[test]
    fn resolved_statuses() {
        for (status, expected) in [
            ("resolved", true),
            ("closed", true),
            ("Resolved", true),
            ("open", false),
            ("investigating", false),
        ] {
            let incident = Incident {
                status: status.to_string(),
                ..Default::default()
            };
            assert_eq!(incident.is_resolved(), expected, "status {status}");
        }
    }
}

//! Incident monitoring: a paginated poll over the WebRCA-style incidents
//! API with state-change detection, emitting issue create/close events
//! through the shared fan-out sink.

use thiserror::Error;

mod client;
mod incidents;
mod monitor;
mod types;

pub use client::{WebRcaClient, DEFAULT_API_URL};
pub use incidents::{to_issue, Incidents, ProcessOutcome};
pub use monitor::{Monitor, DEFAULT_INTERVAL};
pub use types::{Incident, IncidentList, IncidentState, TimelineEvent, User, MONITORED_PRODUCT};

/// Errors from the incident API client.
#[derive(Debug, Error)]
pub enum WebRcaError {
    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the incidents API
    #[error("incident API returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    /// Token endpoint failure or unusable token
    #[error("failed to get access token: {0}")]
    Token(String),
}

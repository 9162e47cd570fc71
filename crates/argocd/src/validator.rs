//! Pure predicates over application state.
//!
//! All gates must pass before an event is treated as a deployment. They are
//! evaluated twice: once on the watch snapshot and again on a freshly fetched
//! application to close the gap between event delivery and processing.

use chrono::{DateTime, Utc};

use crate::resource::Application;

/// Health is acceptable for processing: "Healthy" or "Unknown".
/// Degraded, Missing, Progressing, and Suspended applications are not.
#[must_use]
pub fn is_healthy(app: &Application) -> bool {
    matches!(app.health_status(), "Healthy" | "Unknown")
}

/// Sync state is acceptable for processing: "Synced" or "Unknown".
#[must_use]
pub fn is_synced(app: &Application) -> bool {
    matches!(app.sync_status(), "Synced" | "Unknown")
}

/// The revision is present.
#[must_use]
pub fn has_revision(revision: &str) -> bool {
    !revision.is_empty()
}

/// The revision appears anywhere in the deployment history.
#[must_use]
pub fn is_revision_in_history(app: &Application, revision: &str) -> bool {
    app.history().iter().any(|entry| entry.revision == revision)
}

/// First non-empty deployment timestamp recorded for `revision`.
#[must_use]
pub fn deployed_timestamp(app: &Application, revision: &str) -> Option<DateTime<Utc>> {
    app.history()
        .iter()
        .find(|entry| entry.revision == revision && entry.deployed_at.is_some())
        .and_then(|entry| entry.deployed_at)
}

/// All four processing gates.
#[must_use]
pub fn should_process(app: &Application, revision: &str) -> bool {
    is_healthy(app) && is_synced(app) && has_revision(revision)
}

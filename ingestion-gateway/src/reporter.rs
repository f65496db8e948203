use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::router;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub time: String,
    /// "healthy", or "unhealthy: <reason>"
    pub dedup_store: String,
    pub queue_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub events_accepted: u64,
    pub events_duplicate: u64,
    pub events_rejected: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    /// RFC3339, UTC
    pub timestamp: String,
}

/// Always answers 200: the gateway keeps accepting traffic while the dedup
/// store is down, it only loses duplicate suppression.
pub async fn health(State(state): State<router::State>) -> Json<HealthReport> {
    let dedup_store = match state.dedup.ping().await {
        Ok(()) => "healthy".to_string(),
        Err(err) => format!("unhealthy: {err}"),
    };

    Json(HealthReport {
        status: "healthy".to_string(),
        time: state.timesource.current_time(),
        dedup_store,
        queue_depth: state.queue.depth(),
    })
}

pub async fn metrics(State(state): State<router::State>) -> Json<MetricsReport> {
    let stats = state.stats.snapshot();

    Json(MetricsReport {
        queue_depth: state.queue.depth(),
        queue_capacity: state.queue.capacity(),
        cache_hits: stats.cache_hits,
        cache_misses: stats.cache_misses,
        events_accepted: stats.events_accepted,
        events_duplicate: stats.events_duplicate,
        events_rejected: stats.events_rejected,
        events_published: stats.events_published,
        publish_failures: stats.publish_failures,
        timestamp: state.timesource.current_time(),
    })
}

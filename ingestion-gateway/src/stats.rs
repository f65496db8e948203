use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::prometheus::report_dropped_events;

const DEDUP_CHECKS_TOTAL: &str = "ingestion_dedup_checks_total";
const EVENTS_RECEIVED_TOTAL: &str = "ingestion_events_received_total";
const EVENTS_PUBLISHED_TOTAL: &str = "ingestion_events_published_total";
const DEDUP_WRITE_ERRORS_TOTAL: &str = "ingestion_dedup_write_errors_total";

/// Cumulative pipeline counters, shared by the handlers, the dedup checker
/// and the publish workers. Each counter is mirrored to the metrics recorder
/// so Prometheus sees the same numbers as `/metrics`.
///
/// Counts are per process and start from zero on restart. Totals across
/// instances come from the Prometheus series.
#[derive(Debug, Default)]
pub struct IntakeStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    events_accepted: AtomicU64,
    events_duplicate: AtomicU64,
    events_rejected: AtomicU64,
    events_published: AtomicU64,
    publish_failures: AtomicU64,
    dedup_write_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub events_accepted: u64,
    pub events_duplicate: u64,
    pub events_rejected: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    pub dedup_write_failures: u64,
}

impl IntakeStats {
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        counter!(DEDUP_CHECKS_TOTAL, "outcome" => "hit").increment(1);
    }

    /// A miss is either "not found" or "store unavailable", the check fails open.
    pub fn record_cache_miss(&self, store_error: bool) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        let outcome = if store_error { "error" } else { "miss" };
        counter!(DEDUP_CHECKS_TOTAL, "outcome" => outcome).increment(1);
    }

    pub fn record_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
        counter!(EVENTS_RECEIVED_TOTAL, "outcome" => "accepted").increment(1);
    }

    pub fn record_duplicate(&self) {
        self.events_duplicate.fetch_add(1, Ordering::Relaxed);
        counter!(EVENTS_RECEIVED_TOTAL, "outcome" => "duplicate").increment(1);
    }

    pub fn record_rejected(&self, cause: &'static str) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
        counter!(EVENTS_RECEIVED_TOTAL, "outcome" => "rejected").increment(1);
        report_dropped_events(cause, 1);
    }

    pub fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        counter!(EVENTS_PUBLISHED_TOTAL).increment(1);
    }

    pub fn record_publish_failure(&self, cause: &'static str) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
        report_dropped_events(cause, 1);
    }

    pub fn record_dedup_write_failure(&self) {
        self.dedup_write_failures.fetch_add(1, Ordering::Relaxed);
        counter!(DEDUP_WRITE_ERRORS_TOTAL).increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_duplicate: self.events_duplicate.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            dedup_write_failures: self.dedup_write_failures.load(Ordering::Relaxed),
        }
    }
}

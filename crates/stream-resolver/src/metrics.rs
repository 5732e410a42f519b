//! Metrics for cache, fetch and resolution outcomes.
//!
//! Recording is synchronous and lock-free on the hot path so it can never hold
//! up a resolution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use media_types::ContentKind;

use crate::error::ResolveError;

/// Receiver of resolver metrics. Implementations must not block.
pub trait MetricsSink: Send + Sync {
    fn record_cache_hit(&self, kind: ContentKind, count: usize);
    fn record_cache_miss(&self, kind: ContentKind, count: usize);
    fn record_fetch_success(&self, kind: ContentKind, ids: &[String], duration: Duration);
    fn record_fetch_failure(
        &self,
        kind: ContentKind,
        ids: &[String],
        error: &ResolveError,
        duration: Duration,
    );
    fn record_resolve_success(&self, video_id: &str, duration: Duration);
    fn record_resolve_failure(&self, video_id: &str, error: &ResolveError, duration: Duration);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_cache_hit(&self, _: ContentKind, _: usize) {}
    fn record_cache_miss(&self, _: ContentKind, _: usize) {}
    fn record_fetch_success(&self, _: ContentKind, _: &[String], _: Duration) {}
    fn record_fetch_failure(&self, _: ContentKind, _: &[String], _: &ResolveError, _: Duration) {}
    fn record_resolve_success(&self, _: &str, _: Duration) {}
    fn record_resolve_failure(&self, _: &str, _: &ResolveError, _: Duration) {}
}

#[derive(Debug, Default)]
struct KindCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fetch_success: AtomicU64,
    fetch_failure: AtomicU64,
    fetched_ids: AtomicU64,
}

/// In-process collector backed by atomic counters.
#[derive(Debug, Default)]
pub struct ResolverMetrics {
    by_kind: DashMap<ContentKind, KindCounters>,
    resolve_success: AtomicU64,
    resolve_failure: AtomicU64,
    resolve_duration_total_ms: AtomicU64,
    resolve_errors: DashMap<&'static str, AtomicU64>,
}

impl ResolverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, kind: ContentKind, f: impl FnOnce(&KindCounters)) {
        let counters = self.by_kind.entry(kind).or_default();
        f(&counters);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let kinds = self
            .by_kind
            .iter()
            .map(|entry| {
                let c = entry.value();
                (
                    entry.key().as_str().to_string(),
                    KindSnapshot {
                        cache_hits: c.cache_hits.load(Ordering::Relaxed),
                        cache_misses: c.cache_misses.load(Ordering::Relaxed),
                        fetch_success: c.fetch_success.load(Ordering::Relaxed),
                        fetch_failure: c.fetch_failure.load(Ordering::Relaxed),
                        fetched_ids: c.fetched_ids.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        let resolve_errors = self
            .resolve_errors
            .iter()
            .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
            .collect();

        let success = self.resolve_success.load(Ordering::Relaxed);
        let failure = self.resolve_failure.load(Ordering::Relaxed);
        let total_ms = self.resolve_duration_total_ms.load(Ordering::Relaxed);
        let count = success + failure;

        MetricsSnapshot {
            kinds,
            resolve_success: success,
            resolve_failure: failure,
            resolve_avg_duration_ms: if count > 0 { total_ms / count } else { 0 },
            resolve_errors,
        }
    }

    fn record_resolve_duration(&self, duration: Duration) {
        self.resolve_duration_total_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }
}

impl MetricsSink for ResolverMetrics {
    fn record_cache_hit(&self, kind: ContentKind, count: usize) {
        self.bump(kind, |c| {
            c.cache_hits.fetch_add(count as u64, Ordering::Relaxed);
        });
    }

    fn record_cache_miss(&self, kind: ContentKind, count: usize) {
        self.bump(kind, |c| {
            c.cache_misses.fetch_add(count as u64, Ordering::Relaxed);
        });
    }

    fn record_fetch_success(&self, kind: ContentKind, ids: &[String], duration: Duration) {
        self.bump(kind, |c| {
            c.fetch_success.fetch_add(1, Ordering::Relaxed);
            c.fetched_ids.fetch_add(ids.len() as u64, Ordering::Relaxed);
        });
        debug!(
            kind = %kind,
            count = ids.len(),
            elapsed_ms = duration.as_millis() as u64,
            "Metadata fetch succeeded"
        );
    }

    fn record_fetch_failure(
        &self,
        kind: ContentKind,
        ids: &[String],
        error: &ResolveError,
        duration: Duration,
    ) {
        self.bump(kind, |c| {
            c.fetch_failure.fetch_add(1, Ordering::Relaxed);
        });
        debug!(
            kind = %kind,
            count = ids.len(),
            error = error.kind(),
            elapsed_ms = duration.as_millis() as u64,
            "Metadata fetch failed"
        );
    }

    fn record_resolve_success(&self, video_id: &str, duration: Duration) {
        self.resolve_success.fetch_add(1, Ordering::Relaxed);
        self.record_resolve_duration(duration);
        debug!(video_id, elapsed_ms = duration.as_millis() as u64, "Resolved streams");
    }

    fn record_resolve_failure(&self, video_id: &str, error: &ResolveError, duration: Duration) {
        self.resolve_failure.fetch_add(1, Ordering::Relaxed);
        self.record_resolve_duration(duration);
        self.resolve_errors
            .entry(error.kind())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        debug!(
            video_id,
            error = error.kind(),
            elapsed_ms = duration.as_millis() as u64,
            "Stream resolution failed"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub fetch_success: u64,
    pub fetch_failure: u64,
    pub fetched_ids: u64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub kinds: HashMap<String, KindSnapshot>,
    pub resolve_success: u64,
    pub resolve_failure: u64,
    pub resolve_avg_duration_ms: u64,
    pub resolve_errors: HashMap<String, u64>,
}

impl MetricsSnapshot {
    pub fn kind(&self, kind: ContentKind) -> KindSnapshot {
        self.kinds.get(kind.as_str()).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_kind() {
        let metrics = ResolverMetrics::new();
        metrics.record_cache_hit(ContentKind::Streams, 1);
        metrics.record_cache_miss(ContentKind::Streams, 1);
        metrics.record_cache_miss(ContentKind::Video, 3);
        metrics.record_fetch_success(
            ContentKind::Video,
            &["a".into(), "b".into(), "c".into()],
            Duration::from_millis(5),
        );

        let snap = metrics.snapshot();
        assert_eq!(snap.kind(ContentKind::Streams).cache_hits, 1);
        assert_eq!(snap.kind(ContentKind::Streams).cache_misses, 1);
        assert_eq!(snap.kind(ContentKind::Video).cache_misses, 3);
        assert_eq!(snap.kind(ContentKind::Video).fetched_ids, 3);
        assert_eq!(snap.kind(ContentKind::Channel), KindSnapshot::default());
    }

    #[test]
    fn resolve_outcomes_and_average() {
        let metrics = ResolverMetrics::new();
        metrics.record_resolve_success("a", Duration::from_millis(100));
        metrics.record_resolve_failure(
            "b",
            &ResolveError::extraction("gone"),
            Duration::from_millis(300),
        );

        let snap = metrics.snapshot();
        assert_eq!(snap.resolve_success, 1);
        assert_eq!(snap.resolve_failure, 1);
        assert_eq!(snap.resolve_avg_duration_ms, 200);
        assert_eq!(snap.resolve_errors.get("extraction"), Some(&1));
    }
}

//! Batched metadata lookups for videos, channels and playlists.
//!
//! Hits are served from the matching cache bucket; all misses go upstream in
//! one batch and are cached on success.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use tokio::time::{Instant, timeout};
use tracing::debug;

use media_types::{ChannelMetadata, ContentKind, PlaylistMetadata, VideoMetadata};

use crate::cache::TtlBucket;
use crate::error::ResolveError;
use crate::rate_limiter::RequestKind;
use crate::resolver::StreamResolver;

impl StreamResolver {
    pub async fn fetch_videos(
        &self,
        ids: &[String],
        force_refresh: bool,
    ) -> Result<HashMap<String, VideoMetadata>, ResolveError> {
        let inner = self.inner();
        let bucket = &inner.cache.videos;
        let (mut found, missing) = self.lookup(bucket, ids, force_refresh);
        if missing.is_empty() {
            return Ok(found);
        }
        let fetched = self
            .fetch_batch(bucket.kind(), &missing, inner.transport.fetch_videos(&missing))
            .await?;
        self.store(bucket, fetched, |m| m.id.clone(), &mut found);
        Ok(found)
    }

    pub async fn fetch_channels(
        &self,
        ids: &[String],
        force_refresh: bool,
    ) -> Result<HashMap<String, ChannelMetadata>, ResolveError> {
        let inner = self.inner();
        let bucket = &inner.cache.channels;
        let (mut found, missing) = self.lookup(bucket, ids, force_refresh);
        if missing.is_empty() {
            return Ok(found);
        }
        let fetched = self
            .fetch_batch(bucket.kind(), &missing, inner.transport.fetch_channels(&missing))
            .await?;
        self.store(bucket, fetched, |m| m.id.clone(), &mut found);
        Ok(found)
    }

    pub async fn fetch_playlists(
        &self,
        ids: &[String],
        force_refresh: bool,
    ) -> Result<HashMap<String, PlaylistMetadata>, ResolveError> {
        let inner = self.inner();
        let bucket = &inner.cache.playlists;
        let (mut found, missing) = self.lookup(bucket, ids, force_refresh);
        if missing.is_empty() {
            return Ok(found);
        }
        let fetched = self
            .fetch_batch(bucket.kind(), &missing, inner.transport.fetch_playlists(&missing))
            .await?;
        self.store(bucket, fetched, |m| m.id.clone(), &mut found);
        Ok(found)
    }

    /// Split `ids` into cache hits and misses, recording both counts.
    fn lookup<T: Clone>(
        &self,
        bucket: &TtlBucket<T>,
        ids: &[String],
        force_refresh: bool,
    ) -> (HashMap<String, T>, Vec<String>) {
        let inner = self.inner();
        let now = inner.clock.now();
        let mut seen = HashSet::new();
        let mut found = HashMap::new();
        let mut missing = Vec::new();

        for id in ids.iter().filter(|id| !id.is_empty()) {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let cached = (!force_refresh)
                .then(|| bucket.get(id, now))
                .flatten();
            match cached {
                Some(value) => {
                    found.insert(id.clone(), value);
                }
                None => missing.push(id.clone()),
            }
        }

        if !found.is_empty() {
            inner.metrics.record_cache_hit(bucket.kind(), found.len());
        }
        if !missing.is_empty() {
            inner.metrics.record_cache_miss(bucket.kind(), missing.len());
        }
        (found, missing)
    }

    async fn fetch_batch<T>(
        &self,
        kind: ContentKind,
        ids: &[String],
        fetch: impl Future<Output = Result<Vec<T>, ResolveError>>,
    ) -> Result<Vec<T>, ResolveError> {
        let inner = self.inner();
        // Namespaced so metadata never spaces out a stream extraction.
        let key = format!("{kind}:{}", ids.first().map(String::as_str).unwrap_or_default());
        inner
            .wait_for_rate_limit(&key, RequestKind::Playback)
            .await?;

        let started = Instant::now();
        let limit = self.config().attempt_timeout();
        let result = match timeout(limit, fetch).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(limit)),
        };

        match &result {
            Ok(items) => {
                inner.metrics.record_fetch_success(kind, ids, started.elapsed());
                debug!(kind = %kind, requested = ids.len(), returned = items.len(), "Fetched metadata");
            }
            Err(e) => inner
                .metrics
                .record_fetch_failure(kind, ids, e, started.elapsed()),
        }
        result
    }

    fn store<T: Clone>(
        &self,
        bucket: &TtlBucket<T>,
        fetched: Vec<T>,
        key_of: impl Fn(&T) -> String,
        found: &mut HashMap<String, T>,
    ) {
        let now = self.inner().clock.now();
        for item in fetched {
            let key = key_of(&item);
            bucket.put(key.clone(), item.clone(), now);
            found.insert(key, item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ResolverMetrics;
    use crate::transport::{ExtractionTransport, RawStreams};
    use async_trait::async_trait;
    use media_types::VideoId;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct MetaTransport {
        requested: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl ExtractionTransport for MetaTransport {
        async fn fetch_streams(&self, _: &VideoId) -> Result<RawStreams, ResolveError> {
            Err(ResolveError::extraction("unused"))
        }

        async fn fetch_videos(&self, ids: &[String]) -> Result<Vec<VideoMetadata>, ResolveError> {
            self.requested.lock().push(ids.to_vec());
            if self.fail {
                return Err(ResolveError::transport("down"));
            }
            Ok(ids
                .iter()
                .filter(|id| id.as_str() != "missing")
                .map(|id| VideoMetadata {
                    id: id.clone(),
                    title: format!("title {id}"),
                    channel_id: None,
                    channel_name: None,
                    duration_secs: None,
                    view_count: None,
                    thumbnail_url: None,
                    published_label: None,
                })
                .collect())
        }
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn only_misses_are_fetched() {
        let transport = Arc::new(MetaTransport::default());
        let metrics = Arc::new(ResolverMetrics::new());
        let resolver = StreamResolver::builder(transport.clone())
            .metrics(metrics.clone())
            .build();

        let first = resolver.fetch_videos(&ids(&["a", "b"]), false).await.unwrap();
        assert_eq!(first.len(), 2);

        let second = resolver
            .fetch_videos(&ids(&["a", "b", "c", "c", "missing"]), false)
            .await
            .unwrap();
        assert_eq!(second.len(), 3);
        assert_eq!(second["c"].title, "title c");
        assert_eq!(
            *transport.requested.lock(),
            vec![ids(&["a", "b"]), ids(&["c", "missing"])]
        );

        let snap = metrics.snapshot().kind(ContentKind::Video);
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.cache_misses, 4);
        assert_eq!(snap.fetch_success, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn all_hits_skip_network() {
        let transport = Arc::new(MetaTransport::default());
        let resolver = StreamResolver::builder(transport.clone()).build();
        resolver.fetch_videos(&ids(&["a"]), false).await.unwrap();
        resolver.fetch_videos(&ids(&["a"]), false).await.unwrap();
        assert_eq!(transport.requested.lock().len(), 1);

        tokio::time::advance(std::time::Duration::from_secs(31)).await;
        resolver.fetch_videos(&ids(&["a"]), true).await.unwrap();
        assert_eq!(transport.requested.lock().len(), 2);
    }

    #[tokio::test]
    async fn metadata_does_not_delay_stream_extraction() {
        let transport = Arc::new(MetaTransport::default());
        let resolver = StreamResolver::builder(transport.clone()).build();
        resolver.fetch_videos(&ids(&["dQw4w9WgXcQ"]), false).await.unwrap();

        assert!(
            resolver
                .limiter()
                .acquire("dQw4w9WgXcQ", RequestKind::Playback)
                .is_allowed()
        );
    }

    #[tokio::test]
    async fn failure_is_recorded_and_propagated() {
        let transport = Arc::new(MetaTransport {
            fail: true,
            ..Default::default()
        });
        let metrics = Arc::new(ResolverMetrics::new());
        let resolver = StreamResolver::builder(transport)
            .metrics(metrics.clone())
            .build();

        let err = resolver.fetch_videos(&ids(&["a"]), false).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(metrics.snapshot().kind(ContentKind::Video).fetch_failure, 1);
    }

    #[tokio::test]
    async fn unsupported_kinds_report_extraction_error() {
        let resolver = StreamResolver::builder(Arc::new(MetaTransport::default())).build();
        let err = resolver.fetch_channels(&ids(&["UC1"]), false).await.unwrap_err();
        assert!(matches!(err, ResolveError::Extraction(_)));
    }
}

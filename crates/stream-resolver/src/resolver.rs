//! Stream resolution with caching, deduplication and bounded retries.
//!
//! Lookup order for a video id:
//! 1. reject ids with an invalid format without touching cache or network
//! 2. serve a fresh cache entry unless a refresh was forced
//! 3. join the in-flight resolution for the id, or start one
//!
//! The owner of a resolution consults the rate limiter, fetches, retries once
//! on transport failures and timeouts, writes the cache and publishes the
//! outcome to every joined caller.

use std::sync::Arc;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use media_types::{AudioTrack, ContentKind, ResolvedStreams, VideoId, VideoTrack};

use crate::cache::MetadataCache;
use crate::clock::{Clock, SystemClock};
use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::rate_limiter::{ExtractionRateLimiter, RateLimitDecision, RequestKind};
use crate::retry::with_jitter;
use crate::single_flight::SingleFlight;
use crate::transport::{ExtractionTransport, RawStreams};

pub type ResolveResult = Result<Option<Arc<ResolvedStreams>>, ResolveError>;

pub(crate) struct ResolverInner {
    pub(crate) transport: Arc<dyn ExtractionTransport>,
    pub(crate) cache: Arc<MetadataCache>,
    pub(crate) limiter: Arc<ExtractionRateLimiter>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) clock: Arc<dyn Clock>,
    flights: SingleFlight<String, Arc<ResolvedStreams>>,
    config: ResolverConfig,
}

/// Resolves video ids to playable tracks. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct StreamResolver {
    inner: Arc<ResolverInner>,
}

/// Builder for [`StreamResolver`]; anything not set gets a default instance.
pub struct StreamResolverBuilder {
    transport: Arc<dyn ExtractionTransport>,
    cache: Option<Arc<MetadataCache>>,
    limiter: Option<Arc<ExtractionRateLimiter>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    clock: Option<Arc<dyn Clock>>,
    config: ResolverConfig,
}

impl StreamResolverBuilder {
    pub fn cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn limiter(mut self, limiter: Arc<ExtractionRateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> StreamResolver {
        StreamResolver {
            inner: Arc::new(ResolverInner {
                transport: self.transport,
                cache: self.cache.unwrap_or_default(),
                limiter: self.limiter.unwrap_or_default(),
                metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                flights: SingleFlight::new(),
                config: self.config,
            }),
        }
    }
}

impl StreamResolver {
    pub fn builder(transport: Arc<dyn ExtractionTransport>) -> StreamResolverBuilder {
        StreamResolverBuilder {
            transport,
            cache: None,
            limiter: None,
            metrics: None,
            clock: None,
            config: ResolverConfig::default(),
        }
    }

    /// Resolve `video_id` for playback.
    ///
    /// `Ok(None)` means the id is not well-formed; no request was made.
    pub async fn resolve_streams(&self, video_id: &str, force_refresh: bool) -> ResolveResult {
        self.resolve_with_kind(video_id, force_refresh, RequestKind::Playback)
            .await
    }

    /// Like [`resolve_streams`](Self::resolve_streams) with an explicit request kind
    /// for the rate limiter. The kind only matters if this call starts the fetch.
    ///
    /// A forced refresh skips the cache but still joins a resolution already in
    /// flight, since that one is fresh by definition.
    pub async fn resolve_with_kind(
        &self,
        video_id: &str,
        force_refresh: bool,
        kind: RequestKind,
    ) -> ResolveResult {
        let Some(id) = VideoId::parse(video_id) else {
            debug!(video_id, "Rejected malformed video id");
            return Ok(None);
        };

        if !force_refresh && let Some(streams) = self.cached_streams(&id) {
            self.inner.metrics.record_cache_hit(ContentKind::Streams, 1);
            return Ok(Some(streams));
        }
        self.inner.metrics.record_cache_miss(ContentKind::Streams, 1);

        let inner = self.inner.clone();
        let key = id.as_str().to_string();
        let flight = self
            .inner
            .flights
            .join_or_start(key, move || async move { inner.fetch_and_cache(id, kind).await });
        if !flight.is_owner() {
            debug!(video_id, "Joined in-flight resolution");
        }
        flight.wait().await.map(Some)
    }

    /// A fresh cached bundle for `id`, without recording metrics.
    pub fn cached_streams(&self, id: &VideoId) -> Option<Arc<ResolvedStreams>> {
        let now = self.inner.clock.now();
        let streams = self.inner.cache.streams.get(id.as_str(), now)?;
        let expired = streams.is_expired(
            now,
            self.inner.cache.streams.ttl(),
            self.inner.config.timebase_version,
        );
        (!expired).then_some(streams)
    }

    pub fn is_in_flight(&self, video_id: &str) -> bool {
        self.inner.flights.is_in_flight(&video_id.to_string())
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.flights.in_flight_count()
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.inner.cache
    }

    pub fn limiter(&self) -> &Arc<ExtractionRateLimiter> {
        &self.inner.limiter
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.inner.config
    }

    pub(crate) fn inner(&self) -> &Arc<ResolverInner> {
        &self.inner
    }
}

impl ResolverInner {
    async fn fetch_and_cache(
        &self,
        id: VideoId,
        kind: RequestKind,
    ) -> Result<Arc<ResolvedStreams>, ResolveError> {
        let started = Instant::now();
        let result = self.fetch_with_retry(&id, kind).await.and_then(|raw| {
            build_streams(&id, raw, self.clock.now(), self.config.timebase_version)
        });

        match result {
            Ok(streams) => {
                self.limiter.on_extraction_success(id.as_str());
                let streams = Arc::new(streams);
                self.cache
                    .streams
                    .put(id.as_str(), streams.clone(), streams.generated_at);
                self.metrics
                    .record_resolve_success(id.as_str(), started.elapsed());
                info!(
                    video_id = %id,
                    video_tracks = streams.video_tracks.len(),
                    audio_tracks = streams.audio_tracks.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Resolved streams"
                );
                Ok(streams)
            }
            Err(e) => {
                self.metrics
                    .record_resolve_failure(id.as_str(), &e, started.elapsed());
                warn!(video_id = %id, error = %e, "Stream resolution failed");
                Err(e)
            }
        }
    }

    async fn fetch_with_retry(
        &self,
        id: &VideoId,
        kind: RequestKind,
    ) -> Result<RawStreams, ResolveError> {
        let policy = self.config.retry_policy();
        let mut attempt = 0;
        let mut kind = kind;
        loop {
            match self.attempt(id, kind).await {
                Ok(raw) => return Ok(raw),
                Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        video_id = %id,
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Extraction attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                    if kind == RequestKind::Playback {
                        kind = RequestKind::AutoRecovery;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, id: &VideoId, kind: RequestKind) -> Result<RawStreams, ResolveError> {
        self.wait_for_rate_limit(id.as_str(), kind).await?;

        let limit = self.config.attempt_timeout();
        match timeout(limit, self.transport.fetch_streams(id)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(limit)),
        }
    }

    /// Wait out short denials; fail fast on long ones.
    pub(crate) async fn wait_for_rate_limit(
        &self,
        key: &str,
        kind: RequestKind,
    ) -> Result<(), ResolveError> {
        let max_wait = self.config.max_backoff_wait();
        let mut waits = 0;
        loop {
            let decision = self.limiter.acquire(key, kind);
            let Some(retry_after) = decision.retry_after() else {
                return Ok(());
            };
            if waits >= self.config.max_rate_limit_waits || retry_after > max_wait {
                return Err(ResolveError::RateLimited { retry_after });
            }
            let delay = with_jitter(retry_after);
            debug!(
                key,
                delayed = matches!(decision, RateLimitDecision::Delayed { .. }),
                delay_ms = delay.as_millis() as u64,
                "Backing off for rate limit"
            );
            sleep(delay).await;
            waits += 1;
        }
    }
}

/// Order tracks and apply fallbacks to raw extraction output.
fn build_streams(
    id: &VideoId,
    raw: RawStreams,
    now: chrono::DateTime<chrono::Utc>,
    timebase_version: u32,
) -> Result<ResolvedStreams, ResolveError> {
    let RawStreams {
        muxed,
        video_only,
        mut audio,
        duration_secs,
    } = raw;

    if audio.is_empty()
        && let Some(first) = muxed.first()
    {
        audio.push(AudioTrack::from(first));
    }

    let mut video: Vec<VideoTrack> = muxed.into_iter().chain(video_only).collect();
    for track in &mut video {
        if track.quality_label.is_none() {
            track.quality_label = track.derived_quality_label();
        }
    }
    video.sort_by(|a, b| {
        b.height()
            .cmp(&a.height())
            .then_with(|| b.bitrate.cmp(&a.bitrate))
    });
    audio.sort_by(|a, b| b.bitrate.cmp(&a.bitrate));

    if video.is_empty() && audio.is_empty() {
        return Err(ResolveError::extraction("no playable streams"));
    }

    Ok(ResolvedStreams {
        stream_id: id.as_str().to_string(),
        video_tracks: video,
        audio_tracks: audio,
        duration_secs,
        generated_at: now,
        timebase_version,
    })
}

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use media_types::{ResolvedStreams, VideoId};
use playlist_continuity::{PlaylistEngine, ScopedPrefetcher};
use stream_resolver::{
    ExtractionRateLimiter, InvidiousTransport, MetadataCache, PrefetchService, ResolverMetrics,
    StreamResolver,
};
use synthetic_dash::{ManifestRegistry, check_audio_eligibility, check_video_eligibility};

use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::output::OutputManager;

/// Composition root: owns every engine component for one CLI invocation.
pub struct CommandExecutor {
    config: AppConfig,
    transport: Arc<InvidiousTransport>,
    resolver: StreamResolver,
    metrics: Arc<ResolverMetrics>,
    registry: ManifestRegistry,
    prefetch: Arc<PrefetchService>,
    output: OutputManager,
}

impl CommandExecutor {
    pub fn new(
        config: AppConfig,
        instance: Option<String>,
        format: OutputFormat,
    ) -> Result<Self> {
        let instance = instance.unwrap_or_else(|| config.instance.clone());
        let transport = Arc::new(InvidiousTransport::new(
            &instance,
            config.request_timeout(),
        )?);
        let metrics = Arc::new(ResolverMetrics::new());

        let resolver = StreamResolver::builder(transport.clone())
            .cache(Arc::new(MetadataCache::new(&config.engine.cache)))
            .limiter(Arc::new(ExtractionRateLimiter::new(
                config.engine.rate_limiter.clone(),
            )))
            .metrics(metrics.clone())
            .config(config.engine.resolver.clone())
            .build();
        let prefetch = Arc::new(PrefetchService::new(
            resolver.clone(),
            config.engine.prefetch.clone(),
        ));
        let registry = ManifestRegistry::new(config.engine.cache.manifests);

        debug!(instance = %instance, "Command executor ready");
        Ok(Self {
            config,
            transport,
            resolver,
            metrics,
            registry,
            prefetch,
            output: OutputManager::new(format),
        })
    }

    async fn streams(&self, video_id: &str, force: bool) -> Result<Arc<ResolvedStreams>> {
        // Invalid ids resolve to nothing; report them as such.
        if VideoId::parse(video_id).is_none() {
            return Err(CliError::InvalidVideoId(video_id.to_string()).into());
        }
        match self.resolver.resolve_streams(video_id, force).await? {
            Some(streams) => Ok(streams),
            None => Err(CliError::InvalidVideoId(video_id.to_string()).into()),
        }
    }

    pub async fn resolve(&self, video_id: &str, force: bool) -> Result<()> {
        let streams = self.streams(video_id, force).await?;
        info!(
            video_id,
            video_tracks = streams.video_tracks.len(),
            audio_tracks = streams.audio_tracks.len(),
            "Resolved streams"
        );
        self.output.streams(&streams)?;
        self.output.metrics(&self.metrics.snapshot())
    }

    pub async fn manifest(&self, video_id: &str) -> Result<()> {
        let streams = self.streams(video_id, false).await?;
        match self.registry.get_or_generate(&streams) {
            Ok(manifest) => self.output.manifest(video_id, &manifest),
            Err(e) => {
                let mut tracks = Vec::new();
                for track in &streams.video_tracks {
                    let label = format!(
                        "video {}",
                        track.quality_label.as_deref().unwrap_or(&track.mime_type)
                    );
                    tracks.push((label, check_video_eligibility(track, streams.duration_secs)));
                }
                for track in &streams.audio_tracks {
                    let label = format!("audio {}", track.mime_type);
                    tracks.push((label, check_audio_eligibility(track, streams.duration_secs)));
                }
                self.output.eligibility(&tracks)?;
                Err(e.into())
            }
        }
    }

    pub async fn playlist(
        &self,
        playlist_id: &str,
        target: Option<&str>,
        index: usize,
        shuffle: bool,
        steps: usize,
    ) -> Result<()> {
        let scope = CancellationToken::new();
        let engine = PlaylistEngine::builder(self.transport.clone(), Arc::new(self.resolver.clone()))
            .config(self.config.continuity.clone())
            .prefetcher(Arc::new(ScopedPrefetcher::new(
                self.prefetch.clone(),
                scope.clone(),
            )))
            .build();

        let result = self
            .walk(&engine, playlist_id, target, index, shuffle, steps)
            .await;

        scope.cancel();
        self.prefetch.clear_all();
        self.output.session(&engine.snapshot())?;
        result
    }

    async fn walk(
        &self,
        engine: &PlaylistEngine,
        playlist_id: &str,
        target: Option<&str>,
        index: usize,
        shuffle: bool,
        steps: usize,
    ) -> Result<()> {
        let first = engine
            .start_playlist(playlist_id, target, index, shuffle)
            .await?;
        self.output.playing(1, &first.item)?;

        for step in 2..=steps {
            match engine.advance_after_completion().await? {
                Some(now) => self.output.playing(step, &now.item)?,
                None => {
                    info!(playlist_id, "Reached the end of the playlist");
                    break;
                }
            }
        }
        Ok(())
    }

    pub fn show_config(&self) -> Result<()> {
        self.output.text(&self.config.show()?)
    }
}

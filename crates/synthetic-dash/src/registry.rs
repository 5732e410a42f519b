//! Short-lived store of generated manifests, keyed by stream id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use media_types::{ContentKind, ResolvedStreams};
use stream_resolver::{BucketConfig, CacheConfig, Clock, SystemClock, TtlBucket};

use crate::manifest::{ManifestError, SyntheticManifest, generate_for_streams};

#[derive(Clone)]
struct Registered {
    manifest: Arc<SyntheticManifest>,
    /// `generated_at` of the streams the manifest was built from.
    source: DateTime<Utc>,
}

/// Bounded FIFO registry; entries expire after the configured TTL.
pub struct ManifestRegistry {
    entries: TtlBucket<Registered>,
    clock: Arc<dyn Clock>,
}

impl ManifestRegistry {
    pub fn new(config: BucketConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: BucketConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: TtlBucket::new(ContentKind::Manifest, config),
            clock,
        }
    }

    pub fn register(
        &self,
        streams: &ResolvedStreams,
        manifest: SyntheticManifest,
    ) -> Arc<SyntheticManifest> {
        let manifest = Arc::new(manifest);
        self.entries.put(
            streams.stream_id.clone(),
            Registered {
                manifest: manifest.clone(),
                source: streams.generated_at,
            },
            self.clock.now(),
        );
        manifest
    }

    /// The manifest for `stream_id` if it has not expired.
    pub fn fresh_entry(&self, stream_id: &str) -> Option<Arc<SyntheticManifest>> {
        self.entries
            .get(stream_id, self.clock.now())
            .map(|r| r.manifest)
    }

    /// Reuse the registered manifest when it was built from these same
    /// streams, otherwise generate and register a new one.
    pub fn get_or_generate(
        &self,
        streams: &ResolvedStreams,
    ) -> Result<Arc<SyntheticManifest>, ManifestError> {
        if let Some(entry) = self.entries.get(&streams.stream_id, self.clock.now())
            && entry.source == streams.generated_at
        {
            return Ok(entry.manifest);
        }

        let manifest = generate_for_streams(streams).inspect_err(|e| {
            debug!(stream_id = %streams.stream_id, code = %e.code, "Manifest not generated");
        })?;
        debug!(
            stream_id = %streams.stream_id,
            representations = manifest.representation_count,
            "Registered synthetic manifest"
        );
        Ok(self.register(streams, manifest))
    }

    pub fn unregister(&self, stream_id: &str) -> bool {
        self.entries.remove(stream_id).is_some()
    }

    pub fn clear_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ManifestRegistry {
    fn default() -> Self {
        Self::new(CacheConfig::default().manifests)
    }
}

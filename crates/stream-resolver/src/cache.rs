//! TTL cache with bounded, insertion-ordered buckets.
//!
//! Each bucket keeps its map and its insertion order behind one mutex so an
//! eviction can never observe the two out of sync. Expiry is checked when an
//! entry is read; nothing sweeps in the background.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use media_types::{ChannelMetadata, ContentKind, PlaylistMetadata, ResolvedStreams, VideoMetadata};

use crate::config::{BucketConfig, CacheConfig};

/// A cached value with the time it was inserted or last refreshed.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    /// A timestamp in the future means the clock went backwards; treat it as stale.
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (now - self.inserted_at).to_std() {
            Ok(age) => age > ttl,
            Err(_) => true,
        }
    }
}

struct BucketInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    order: VecDeque<String>,
}

/// One bounded bucket with FIFO eviction.
pub struct TtlBucket<V> {
    kind: ContentKind,
    inner: Mutex<BucketInner<V>>,
    max_entries: usize,
    ttl: Duration,
}

impl<V: Clone> TtlBucket<V> {
    pub fn new(kind: ContentKind, config: BucketConfig) -> Self {
        Self {
            kind,
            inner: Mutex::new(BucketInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            max_entries: config.max_entries.max(1),
            ttl: config.ttl(),
        }
    }

    /// Returns the value if present and not older than the bucket TTL.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(key)?;
        if entry.is_expired(now, self.ttl) {
            trace!(kind = %self.kind, key, "cache entry expired");
            return None;
        }
        Some(entry.value.clone())
    }

    /// Insert or refresh `key`.
    ///
    /// Refreshing keeps the key's original insertion position. A new key
    /// evicts the oldest-inserted entries until there is room.
    pub fn put(&self, key: impl Into<String>, value: V, now: DateTime<Utc>) {
        let key = key.into();
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.value = value;
            entry.inserted_at = now;
            return;
        }

        while inner.entries.len() >= self.max_entries {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
            trace!(kind = %self.kind, key = %oldest, "evicted oldest cache entry");
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.remove(key)?;
        inner.order.retain(|k| k != key);
        Some(entry.value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }
}

/// Per-kind buckets for metadata and resolved streams.
pub struct MetadataCache {
    pub streams: TtlBucket<Arc<ResolvedStreams>>,
    pub videos: TtlBucket<VideoMetadata>,
    pub channels: TtlBucket<ChannelMetadata>,
    pub playlists: TtlBucket<PlaylistMetadata>,
}

/// Number of entries held per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub streams: usize,
    pub videos: usize,
    pub channels: usize,
    pub playlists: usize,
}

impl MetadataCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            streams: TtlBucket::new(ContentKind::Streams, config.streams),
            videos: TtlBucket::new(ContentKind::Video, config.videos),
            channels: TtlBucket::new(ContentKind::Channel, config.channels),
            playlists: TtlBucket::new(ContentKind::Playlist, config.playlists),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            streams: self.streams.len(),
            videos: self.videos.len(),
            channels: self.channels.len(),
            playlists: self.playlists.len(),
        }
    }

    pub fn clear(&self) {
        self.streams.clear();
        self.videos.clear();
        self.channels.clear();
        self.playlists.clear();
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

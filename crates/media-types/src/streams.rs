use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AudioTrack, VideoTrack};

/// The outcome of resolving one video: ordered tracks plus freshness data.
///
/// Shared behind an `Arc` and never mutated; a refresh builds a new value and
/// replaces the cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStreams {
    pub stream_id: String,
    pub video_tracks: Vec<VideoTrack>,
    pub audio_tracks: Vec<AudioTrack>,
    pub duration_secs: Option<u64>,
    pub generated_at: DateTime<Utc>,
    pub timebase_version: u32,
}

impl ResolvedStreams {
    /// Whether this bundle must not be served any more.
    ///
    /// Expired when the clock moved backwards past `generated_at`, when more
    /// than `ttl` has elapsed (exactly `ttl` is still fresh), or when it was
    /// produced under a different timebase version.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration, current_version: u32) -> bool {
        if self.timebase_version != current_version {
            return true;
        }
        let Ok(age) = (now - self.generated_at).to_std() else {
            return true;
        };
        age > ttl
    }

    pub fn best_video(&self) -> Option<&VideoTrack> {
        self.video_tracks.first()
    }

    pub fn best_audio(&self) -> Option<&AudioTrack> {
        self.audio_tracks.first()
    }

    pub fn is_empty(&self) -> bool {
        self.video_tracks.is_empty() && self.audio_tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TTL: Duration = Duration::from_secs(30 * 60);

    fn streams_at(generated_at: DateTime<Utc>, version: u32) -> ResolvedStreams {
        ResolvedStreams {
            stream_id: "dQw4w9WgXcQ".into(),
            video_tracks: vec![],
            audio_tracks: vec![],
            duration_secs: Some(212),
            generated_at,
            timebase_version: version,
        }
    }

    #[test]
    fn expiry_boundaries() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let streams = streams_at(t, 2);
        let ttl = chrono::Duration::from_std(TTL).unwrap();
        let ms = chrono::Duration::milliseconds(1);

        assert!(!streams.is_expired(t, TTL, 2));
        assert!(!streams.is_expired(t + ttl - ms, TTL, 2));
        assert!(!streams.is_expired(t + ttl, TTL, 2));
        assert!(streams.is_expired(t + ttl + ms, TTL, 2));
        assert!(streams.is_expired(t - ms, TTL, 2));
    }

    #[test]
    fn timebase_mismatch_expires() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let streams = streams_at(t, 1);
        assert!(streams.is_expired(t, TTL, 2));
    }
}

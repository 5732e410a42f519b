use serde::{Deserialize, Serialize};

use crate::Resolution;

/// How the bytes of a track are delivered by the upstream host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    /// A plain URL that honours HTTP `Range` requests.
    ProgressiveHttp,
    Dash,
    Hls,
    #[default]
    Unknown,
}

impl DeliveryMethod {
    pub fn supports_byte_ranges(&self) -> bool {
        matches!(self, Self::ProgressiveHttp)
    }
}

/// Inclusive byte range inside a media file.
///
/// Upstream data uses negative values for "unknown", so the fields are signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: i64,
    pub end: i64,
}

impl ByteRange {
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Parse the `start-end` form used by DASH and most extraction APIs.
    pub fn parse(s: &str) -> Option<Self> {
        let (start, end) = s.trim().split_once('-')?;
        Some(Self::new(start.parse().ok()?, end.parse().ok()?))
    }

    /// `start == end` is a valid single-byte range.
    pub fn is_valid(&self) -> bool {
        self.start >= 0 && self.end >= 0 && self.start <= self.end
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Per-track metadata needed to describe the track in a DASH `SegmentBase`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SegmentIndex {
    pub itag: u32,
    pub init_range: Option<ByteRange>,
    pub index_range: Option<ByteRange>,
    pub approx_duration_ms: Option<u64>,
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoTrack {
    pub url: String,
    pub mime_type: String,
    pub resolution: Option<Resolution>,
    pub bitrate: Option<u64>,
    pub quality_label: Option<String>,
    pub fps: Option<u32>,
    pub codec: Option<String>,
    /// `false` for muxed (audio + video) streams.
    pub is_video_only: bool,
    pub delivery: DeliveryMethod,
    pub segment_index: Option<SegmentIndex>,
}

impl VideoTrack {
    pub fn height(&self) -> Option<u32> {
        self.resolution.map(|r| r.height)
    }

    /// `"{height}p"`, with the frame rate appended above 30 fps (e.g. `1080p60`).
    pub fn derived_quality_label(&self) -> Option<String> {
        let height = self.height()?;
        Some(match self.fps {
            Some(fps) if fps > 30 => format!("{height}p{fps}"),
            _ => format!("{height}p"),
        })
    }

    /// Container name taken from the mime type, e.g. `mp4` for `video/mp4`.
    pub fn container(&self) -> Option<&str> {
        container_of(&self.mime_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioTrack {
    pub url: String,
    pub mime_type: String,
    pub bitrate: Option<u64>,
    pub codec: Option<String>,
    pub delivery: DeliveryMethod,
    pub segment_index: Option<SegmentIndex>,
}

impl AudioTrack {
    pub fn container(&self) -> Option<&str> {
        container_of(&self.mime_type)
    }
}

impl From<&VideoTrack> for AudioTrack {
    /// Muxed video tracks double as audio when no dedicated audio exists.
    fn from(track: &VideoTrack) -> Self {
        Self {
            url: track.url.clone(),
            mime_type: track.mime_type.clone(),
            bitrate: track.bitrate,
            codec: track.codec.clone(),
            delivery: track.delivery,
            segment_index: track.segment_index.clone(),
        }
    }
}

fn container_of(mime_type: &str) -> Option<&str> {
    let essence = mime_type.split(';').next()?.trim();
    let (_, subtype) = essence.split_once('/')?;
    (!subtype.is_empty()).then_some(subtype)
}

//! Shared media domain types.
//!
//! Everything here is plain data: identifiers, tracks, resolved stream bundles,
//! playlist pages and metadata records. Behaviour that needs I/O lives in the
//! `stream-resolver`, `synthetic-dash` and `playlist-continuity` crates.

mod metadata;
mod playlist;
mod streams;
mod track;
mod video_id;

pub use metadata::{ChannelMetadata, ContentKind, PlaylistMetadata, VideoMetadata};
pub use playlist::{ContinuationToken, PlaylistItem, PlaylistPage};
pub use streams::ResolvedStreams;
pub use track::{AudioTrack, ByteRange, DeliveryMethod, SegmentIndex, VideoTrack};
pub use video_id::VideoId;

use serde::{Deserialize, Serialize};

/// Video resolution information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    #[inline]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a `WIDTHxHEIGHT` string such as `640x360`.
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.trim().split_once('x')?;
        Some(Self::new(w.parse().ok()?, h.parse().ok()?))
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

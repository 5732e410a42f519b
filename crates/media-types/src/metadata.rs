use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of cached content; each kind gets its own cache bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Video,
    Channel,
    Playlist,
    Streams,
    /// Locally generated manifests.
    Manifest,
}

impl ContentKind {
    pub const ALL: [ContentKind; 5] = [
        Self::Video,
        Self::Channel,
        Self::Playlist,
        Self::Streams,
        Self::Manifest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Channel => "channel",
            Self::Playlist => "playlist",
            Self::Streams => "streams",
            Self::Manifest => "manifest",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    pub duration_secs: Option<u64>,
    pub view_count: Option<u64>,
    pub thumbnail_url: Option<String>,
    pub published_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub id: String,
    pub name: String,
    pub subscriber_count: Option<u64>,
    pub avatar_url: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistMetadata {
    pub id: String,
    pub title: String,
    pub item_count: Option<u32>,
    pub channel_name: Option<String>,
    pub thumbnail_url: Option<String>,
}

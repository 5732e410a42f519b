use serde::{Deserialize, Serialize};

/// Opaque cursor handed back by the upstream to request the following page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// 1-based position inside the whole playlist.
    pub position: u32,
    pub video_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub duration_secs: Option<u64>,
    pub view_count: Option<u64>,
    pub published_label: Option<String>,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
}

impl PlaylistItem {
    pub fn new(position: u32, video_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            position,
            video_id: video_id.into(),
            title: title.into(),
            thumbnail_url: None,
            duration_secs: None,
            view_count: None,
            published_label: None,
            channel_id: None,
            channel_name: None,
        }
    }
}

/// One page of a paginated collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistPage<T> {
    pub items: Vec<T>,
    /// `None` on the last page.
    pub continuation: Option<ContinuationToken>,
    /// 1-based position of the first item on the following page.
    pub next_item_offset: u32,
}

impl<T> PlaylistPage<T> {
    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }
}

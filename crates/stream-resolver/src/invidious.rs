//! Extraction transport for Invidious-compatible JSON APIs.
//!
//! Only the handful of endpoints the engine needs are covered:
//! `/api/v1/videos/{id}`, `/api/v1/channels/{id}` and `/api/v1/playlists/{id}`.
//! Request URLs are never logged; stream URLs carry signatures.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use media_types::{
    AudioTrack, ByteRange, ChannelMetadata, ContinuationToken, DeliveryMethod, PlaylistItem,
    PlaylistMetadata, PlaylistPage, Resolution, SegmentIndex, VideoId, VideoMetadata, VideoTrack,
};

use crate::error::ResolveError;
use crate::transport::{ExtractionTransport, RawStreams};

const DEFAULT_USER_AGENT: &str = concat!("tube-engine/", env!("CARGO_PKG_VERSION"));

fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// HTTP client for one Invidious instance.
#[derive(Debug, Clone)]
pub struct InvidiousTransport {
    client: reqwest::Client,
    base: Url,
}

impl InvidiousTransport {
    pub fn new(instance: &str, request_timeout: Duration) -> Result<Self, ResolveError> {
        install_rustls_provider();

        let mut base = Url::parse(instance)
            .map_err(|e| ResolveError::transport(format!("invalid instance url: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(request_timeout)
            .build()?;

        Ok(Self { client, base })
    }

    /// `api/v1/{collection}/{id}` under the instance, with `id` escaped as a
    /// single path segment.
    fn resource(&self, collection: &str, id: &str) -> Result<Url, ResolveError> {
        if matches!(id, "" | "." | "..") {
            return Err(ResolveError::extraction(format!("invalid {collection} id")));
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ResolveError::transport("instance url cannot carry a path"))?
            .pop_if_empty()
            .extend(["api", "v1", collection])
            .push(id);
        Ok(url)
    }

    /// GET and decode. `Ok(None)` means the resource does not exist.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, ResolveError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        trace!(status = status.as_u16(), bytes = body.len(), "Invidious response");

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if let Some(message) = api_error(&body) {
            return Err(ResolveError::extraction(message));
        }
        if !status.is_success() {
            return Err(ResolveError::transport_status(
                status.as_u16(),
                format!("unexpected status {status}"),
            ));
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| ResolveError::transport(format!("malformed response: {e}")))
    }

    /// One page of a playlist. Pages are numbered from 1.
    pub async fn fetch_playlist_page(
        &self,
        playlist_id: &str,
        page: u32,
    ) -> Result<Option<PlaylistPage<PlaylistItem>>, ResolveError> {
        let mut url = self.resource("playlists", playlist_id)?;
        url.query_pairs_mut().append_pair("page", &page.to_string());
        let response: Option<PlaylistResponse> = self.get_json(url).await?;
        Ok(response.map(|r| r.into_page(page)))
    }
}

#[async_trait]
impl ExtractionTransport for InvidiousTransport {
    async fn fetch_streams(&self, video_id: &VideoId) -> Result<RawStreams, ResolveError> {
        let url = self.resource("videos", video_id.as_str())?;
        match self.get_json::<VideoResponse>(url).await? {
            Some(video) => Ok(video.into_raw_streams()),
            None => Err(ResolveError::extraction("video not found")),
        }
    }

    async fn fetch_videos(&self, ids: &[String]) -> Result<Vec<VideoMetadata>, ResolveError> {
        let requests = ids.iter().map(|id| async move {
            let url = self.resource("videos", id)?;
            self.get_json::<VideoResponse>(url).await
        });
        collect_found(join_all(requests).await, VideoResponse::into_metadata)
    }

    async fn fetch_channels(&self, ids: &[String]) -> Result<Vec<ChannelMetadata>, ResolveError> {
        let requests = ids.iter().map(|id| async move {
            let url = self.resource("channels", id)?;
            self.get_json::<ChannelResponse>(url).await
        });
        collect_found(join_all(requests).await, ChannelResponse::into_metadata)
    }

    async fn fetch_playlists(
        &self,
        ids: &[String],
    ) -> Result<Vec<PlaylistMetadata>, ResolveError> {
        let requests = ids.iter().map(|id| async move {
            let url = self.resource("playlists", id)?;
            self.get_json::<PlaylistResponse>(url).await
        });
        collect_found(join_all(requests).await, PlaylistResponse::into_metadata)
    }
}

fn collect_found<R, T>(
    results: Vec<Result<Option<R>, ResolveError>>,
    map: impl Fn(R) -> T,
) -> Result<Vec<T>, ResolveError> {
    let mut found = Vec::with_capacity(results.len());
    for result in results {
        if let Some(response) = result? {
            found.push(map(response));
        }
    }
    Ok(found)
}

fn api_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    serde_json::from_str::<ErrorBody>(body).ok().map(|b| b.error)
}

/// Numbers arrive either as JSON numbers or as strings depending on the field.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Num {
    Int(u64),
    Str(String),
}

impl Num {
    fn value(&self) -> Option<u64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(s) => s.trim().parse().ok(),
        }
    }
}

fn num(value: &Option<Num>) -> Option<u64> {
    value.as_ref().and_then(Num::value)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdaptiveFormat {
    url: String,
    itag: Option<Num>,
    #[serde(rename = "type")]
    mime: String,
    bitrate: Option<Num>,
    init: Option<String>,
    index: Option<String>,
    clen: Option<Num>,
    size: Option<String>,
    quality_label: Option<String>,
    fps: Option<Num>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormatStream {
    url: String,
    itag: Option<Num>,
    #[serde(rename = "type")]
    mime: String,
    bitrate: Option<Num>,
    size: Option<String>,
    quality_label: Option<String>,
    fps: Option<Num>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResponse {
    video_id: String,
    title: String,
    author: Option<String>,
    author_id: Option<String>,
    length_seconds: Option<Num>,
    view_count: Option<Num>,
    published_text: Option<String>,
    #[serde(default)]
    video_thumbnails: Vec<Thumbnail>,
    #[serde(default)]
    adaptive_formats: Vec<AdaptiveFormat>,
    #[serde(default)]
    format_streams: Vec<FormatStream>,
}

/// Split `video/mp4; codecs="avc1.4d401f"` into essence and codec.
fn split_mime(raw: &str) -> (String, Option<String>) {
    let mut parts = raw.split(';');
    let essence = parts.next().unwrap_or_default().trim().to_string();
    let codec = parts.find_map(|p| {
        let p = p.trim();
        p.strip_prefix("codecs=")
            .map(|c| c.trim_matches('"').to_string())
    });
    (essence, codec)
}

/// Approximate duration from the `dur` query parameter (seconds, fractional).
fn approx_duration_ms(stream_url: &str) -> Option<u64> {
    let url = Url::parse(stream_url).ok()?;
    let (_, dur) = url.query_pairs().find(|(k, _)| k == "dur")?;
    let secs: f64 = dur.parse().ok()?;
    (secs.is_finite() && secs > 0.0).then(|| (secs * 1000.0).round() as u64)
}

impl AdaptiveFormat {
    fn segment_index(&self) -> SegmentIndex {
        SegmentIndex {
            itag: num(&self.itag).unwrap_or_default() as u32,
            init_range: self.init.as_deref().and_then(ByteRange::parse),
            index_range: self.index.as_deref().and_then(ByteRange::parse),
            approx_duration_ms: approx_duration_ms(&self.url),
            content_length: num(&self.clen),
        }
    }
}

impl VideoResponse {
    fn into_raw_streams(self) -> RawStreams {
        let duration_secs = num(&self.length_seconds).filter(|d| *d > 0);
        let mut raw = RawStreams {
            duration_secs,
            ..Default::default()
        };

        for format in self.adaptive_formats {
            let (mime_type, codec) = split_mime(&format.mime);
            let segment_index = Some(format.segment_index());
            if mime_type.starts_with("audio/") {
                raw.audio.push(AudioTrack {
                    url: format.url,
                    mime_type,
                    bitrate: num(&format.bitrate),
                    codec,
                    delivery: DeliveryMethod::ProgressiveHttp,
                    segment_index,
                });
            } else if mime_type.starts_with("video/") {
                raw.video_only.push(VideoTrack {
                    url: format.url,
                    mime_type,
                    resolution: format.size.as_deref().and_then(Resolution::parse),
                    bitrate: num(&format.bitrate),
                    quality_label: format.quality_label,
                    fps: num(&format.fps).map(|f| f as u32),
                    codec,
                    is_video_only: true,
                    delivery: DeliveryMethod::ProgressiveHttp,
                    segment_index,
                });
            }
        }

        for stream in self.format_streams {
            let (mime_type, codec) = split_mime(&stream.mime);
            raw.muxed.push(VideoTrack {
                url: stream.url,
                mime_type,
                resolution: stream.size.as_deref().and_then(Resolution::parse),
                bitrate: num(&stream.bitrate),
                quality_label: stream.quality_label,
                fps: num(&stream.fps).map(|f| f as u32),
                codec,
                is_video_only: false,
                delivery: DeliveryMethod::ProgressiveHttp,
                segment_index: num(&stream.itag).map(|itag| SegmentIndex {
                    itag: itag as u32,
                    ..Default::default()
                }),
            });
        }

        raw
    }

    fn into_metadata(self) -> VideoMetadata {
        VideoMetadata {
            id: self.video_id,
            title: self.title,
            channel_id: self.author_id,
            channel_name: self.author,
            duration_secs: num(&self.length_seconds),
            view_count: num(&self.view_count),
            thumbnail_url: self.video_thumbnails.into_iter().next().map(|t| t.url),
            published_label: self.published_text,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResponse {
    author: String,
    author_id: String,
    sub_count: Option<Num>,
    #[serde(default)]
    author_thumbnails: Vec<Thumbnail>,
    description: Option<String>,
}

impl ChannelResponse {
    fn into_metadata(self) -> ChannelMetadata {
        ChannelMetadata {
            id: self.author_id,
            name: self.author,
            subscriber_count: num(&self.sub_count),
            avatar_url: self.author_thumbnails.into_iter().last().map(|t| t.url),
            description: self.description.filter(|d| !d.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistVideo {
    video_id: String,
    title: String,
    author: Option<String>,
    author_id: Option<String>,
    length_seconds: Option<Num>,
    /// 0-based position in the whole playlist.
    index: Option<Num>,
    #[serde(default)]
    video_thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistResponse {
    playlist_id: String,
    title: String,
    author: Option<String>,
    video_count: Option<Num>,
    playlist_thumbnail: Option<String>,
    #[serde(default)]
    videos: Vec<PlaylistVideo>,
}

impl PlaylistResponse {
    fn into_metadata(self) -> PlaylistMetadata {
        PlaylistMetadata {
            id: self.playlist_id,
            title: self.title,
            item_count: num(&self.video_count).map(|c| c as u32),
            channel_name: self.author,
            thumbnail_url: self.playlist_thumbnail,
        }
    }

    fn into_page(self, page: u32) -> PlaylistPage<PlaylistItem> {
        let total = num(&self.video_count);
        let items: Vec<PlaylistItem> = self
            .videos
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let position = num(&v.index).map(|idx| idx as u32 + 1).unwrap_or(i as u32 + 1);
                PlaylistItem {
                    position,
                    video_id: v.video_id,
                    title: v.title,
                    thumbnail_url: v.video_thumbnails.into_iter().next().map(|t| t.url),
                    duration_secs: num(&v.length_seconds),
                    view_count: None,
                    published_label: None,
                    channel_id: v.author_id,
                    channel_name: v.author,
                }
            })
            .collect();

        let next_item_offset = items.last().map(|i| i.position + 1).unwrap_or(1);
        let has_more = match (items.is_empty(), total) {
            (true, _) => false,
            (false, Some(total)) => u64::from(next_item_offset) <= total,
            (false, None) => true,
        };

        PlaylistPage {
            items,
            continuation: has_more.then(|| ContinuationToken::new((page + 1).to_string())),
            next_item_offset,
        }
    }
}

use async_trait::async_trait;

use media_types::{
    AudioTrack, ChannelMetadata, PlaylistMetadata, VideoId, VideoMetadata, VideoTrack,
};

use crate::error::ResolveError;

/// Streams as returned by the extraction service, before ordering and fallbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawStreams {
    /// Combined audio + video streams.
    pub muxed: Vec<VideoTrack>,
    pub video_only: Vec<VideoTrack>,
    pub audio: Vec<AudioTrack>,
    pub duration_secs: Option<u64>,
}

/// The upstream extraction service.
///
/// Implementations report network problems as [`ResolveError::Transport`]
/// and unavailable content as [`ResolveError::Extraction`].
#[async_trait]
pub trait ExtractionTransport: Send + Sync + 'static {
    async fn fetch_streams(&self, video_id: &VideoId) -> Result<RawStreams, ResolveError>;

    /// Batch lookup; ids that do not exist upstream are simply absent.
    async fn fetch_videos(&self, _ids: &[String]) -> Result<Vec<VideoMetadata>, ResolveError> {
        Err(ResolveError::extraction("video metadata not supported by transport"))
    }

    async fn fetch_channels(&self, _ids: &[String]) -> Result<Vec<ChannelMetadata>, ResolveError> {
        Err(ResolveError::extraction("channel metadata not supported by transport"))
    }

    async fn fetch_playlists(
        &self,
        _ids: &[String],
    ) -> Result<Vec<PlaylistMetadata>, ResolveError> {
        Err(ResolveError::extraction("playlist metadata not supported by transport"))
    }
}

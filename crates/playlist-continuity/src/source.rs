//! Seams between the engine and the outside world.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use media_types::{ContinuationToken, PlaylistItem, PlaylistPage, ResolvedStreams};
use stream_resolver::{InvidiousTransport, PrefetchService, ResolveError, StreamResolver};

use crate::error::PageError;

#[async_trait]
pub trait PlaylistSource: Send + Sync {
    /// `cursor` is `None` for the first page and otherwise the continuation
    /// returned with the previous page.
    async fn fetch_page(
        &self,
        playlist_id: &str,
        cursor: Option<&ContinuationToken>,
    ) -> Result<PlaylistPage<PlaylistItem>, PageError>;
}

#[async_trait]
pub trait StreamSource: Send + Sync {
    /// `Ok(None)` means the item has nothing playable.
    async fn resolve(&self, video_id: &str) -> Result<Option<Arc<ResolvedStreams>>, ResolveError>;
}

/// Speculative resolution of the item that will play next.
#[async_trait]
pub trait Prefetcher: Send + Sync {
    fn prefetch(&self, video_id: &str);

    /// Take a prefetched result for `video_id`, if there is one.
    async fn take(&self, video_id: &str) -> Option<Arc<ResolvedStreams>>;
}

#[async_trait]
impl StreamSource for StreamResolver {
    async fn resolve(&self, video_id: &str) -> Result<Option<Arc<ResolvedStreams>>, ResolveError> {
        self.resolve_streams(video_id, false).await
    }
}

#[async_trait]
impl PlaylistSource for InvidiousTransport {
    async fn fetch_page(
        &self,
        playlist_id: &str,
        cursor: Option<&ContinuationToken>,
    ) -> Result<PlaylistPage<PlaylistItem>, PageError> {
        let page = match cursor {
            None => 1,
            Some(token) => token
                .as_str()
                .parse::<u32>()
                .map_err(|_| PageError::Transport("unrecognised continuation".to_string()))?,
        };
        match self.fetch_playlist_page(playlist_id, page).await {
            Ok(Some(page)) => Ok(page),
            Ok(None) => Err(PageError::NotFound),
            Err(ResolveError::Timeout(d)) => Err(PageError::Timeout(d)),
            Err(e) => Err(PageError::Transport(e.to_string())),
        }
    }
}

/// Routes prefetches through a [`PrefetchService`] under one cancellation scope.
pub struct ScopedPrefetcher {
    service: Arc<PrefetchService>,
    scope: CancellationToken,
}

impl ScopedPrefetcher {
    pub fn new(service: Arc<PrefetchService>, scope: CancellationToken) -> Self {
        Self { service, scope }
    }
}

#[async_trait]
impl Prefetcher for ScopedPrefetcher {
    fn prefetch(&self, video_id: &str) {
        self.service.trigger_prefetch(video_id, &self.scope);
    }

    async fn take(&self, video_id: &str) -> Option<Arc<ResolvedStreams>> {
        self.service.await_or_consume_prefetch(video_id).await
    }
}

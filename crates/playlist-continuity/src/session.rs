//! Playlist playback sessions.
//!
//! A session walks a paginated playlist: it locates the starting item (deep
//! start), grows its queue page by page as playback advances, and skips a
//! bounded number of unplayable items on its own. Transitions are serialized
//! by an async lock; the plain session state sits behind a sync mutex that is
//! never held across an await.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use media_types::{ContinuationToken, PlaylistItem, PlaylistPage, ResolvedStreams};

use crate::config::ContinuityConfig;
use crate::error::{PageError, PlaybackError};
use crate::source::{PlaylistSource, Prefetcher, StreamSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Exhausted,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Inactive,
    Playlist,
    SingleVideo,
}

/// The item that started playing and what it resolved to.
#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub item: PlaylistItem,
    pub streams: Arc<ResolvedStreams>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub mode: SessionMode,
    pub state: PlaybackState,
    pub playlist_id: Option<String>,
    pub current: Option<PlaylistItem>,
    pub queue_len: usize,
    pub has_next: bool,
    pub has_more_pages: bool,
    pub paging_failed: bool,
    pub consecutive_skips: u32,
    pub shuffle: bool,
    pub last_error: Option<String>,
}

/// Whether anything can follow the current item.
///
/// Shuffle only plays what is already loaded, and a failed page fetch is not
/// retried.
pub fn has_next(queue_len: usize, has_more_pages: bool, paging_failed: bool, shuffle: bool) -> bool {
    queue_len > 0 || (!shuffle && has_more_pages && !paging_failed)
}

#[derive(Debug, Default)]
struct Session {
    mode: SessionMode,
    state: PlaybackState,
    playlist_id: Option<String>,
    current: Option<PlaylistItem>,
    streams: Option<Arc<ResolvedStreams>>,
    queue: VecDeque<PlaylistItem>,
    cursor: Option<ContinuationToken>,
    has_more: bool,
    paging_failed: bool,
    shuffle: bool,
    consecutive_skips: u32,
    last_error: Option<String>,
}

impl Session {
    fn can_page(&self) -> bool {
        self.mode == SessionMode::Playlist && !self.shuffle && self.has_more && !self.paging_failed
    }

    fn has_next(&self) -> bool {
        has_next(
            self.queue.len(),
            self.has_more,
            self.paging_failed,
            self.shuffle,
        )
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.mode,
            state: self.state,
            playlist_id: self.playlist_id.clone(),
            current: self.current.clone(),
            queue_len: self.queue.len(),
            has_next: self.has_next(),
            has_more_pages: self.has_more,
            paging_failed: self.paging_failed,
            consecutive_skips: self.consecutive_skips,
            shuffle: self.shuffle,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageFetch {
    /// The queue is empty; wait for any running fetch, then fetch if still needed.
    Blocking,
    /// Opportunistic; gives up if another fetch holds the page lock.
    Background,
}

struct DeepStart {
    loaded: Vec<PlaylistItem>,
    index: usize,
    cursor: Option<ContinuationToken>,
    paging_failed: bool,
}

pub struct PlaylistEngineBuilder {
    playlists: Arc<dyn PlaylistSource>,
    streams: Arc<dyn StreamSource>,
    prefetcher: Option<Arc<dyn Prefetcher>>,
    config: ContinuityConfig,
}

impl PlaylistEngineBuilder {
    pub fn config(mut self, config: ContinuityConfig) -> Self {
        self.config = config;
        self
    }

    pub fn prefetcher(mut self, prefetcher: Arc<dyn Prefetcher>) -> Self {
        self.prefetcher = Some(prefetcher);
        self
    }

    pub fn build(self) -> PlaylistEngine {
        PlaylistEngine {
            inner: Arc::new(EngineInner {
                playlists: self.playlists,
                streams: self.streams,
                prefetcher: self.prefetcher,
                config: self.config,
                transition: tokio::sync::Mutex::new(()),
                page_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                session: Mutex::new(Session::default()),
                background: Mutex::new(None),
            }),
        }
    }
}

/// One playback session over a playlist or a single video.
#[derive(Clone)]
pub struct PlaylistEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    playlists: Arc<dyn PlaylistSource>,
    streams: Arc<dyn StreamSource>,
    prefetcher: Option<Arc<dyn Prefetcher>>,
    config: ContinuityConfig,
    transition: tokio::sync::Mutex<()>,
    page_lock: tokio::sync::Mutex<()>,
    /// Bumped whenever the session is replaced.
    generation: AtomicU64,
    session: Mutex<Session>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl PlaylistEngine {
    pub fn builder(
        playlists: Arc<dyn PlaylistSource>,
        streams: Arc<dyn StreamSource>,
    ) -> PlaylistEngineBuilder {
        PlaylistEngineBuilder {
            playlists,
            streams,
            prefetcher: None,
            config: ContinuityConfig::default(),
        }
    }

    /// Start playing `playlist_id`.
    ///
    /// With a target, the item at `hint_index` on the first page is checked
    /// first; otherwise pages are fetched until the target turns up. If it
    /// never does, playback falls back to `hint_index` when that was loaded.
    pub async fn start_playlist(
        &self,
        playlist_id: &str,
        target_video_id: Option<&str>,
        hint_index: usize,
        shuffle: bool,
    ) -> Result<NowPlaying, PlaybackError> {
        let _transition = self.inner.transition.lock().await;
        let generation = self.inner.begin(SessionMode::Playlist, Some(playlist_id), shuffle);

        let start = match self
            .inner
            .deep_start(playlist_id, target_video_id, hint_index)
            .await
        {
            Ok(start) => start,
            Err(e) => return Err(self.inner.fail(generation, e)),
        };

        let DeepStart {
            mut loaded,
            index,
            cursor,
            paging_failed,
        } = start;
        let first = loaded.remove(index);
        let queue = if shuffle {
            loaded.shuffle(&mut rand::rng());
            loaded
        } else {
            loaded.split_off(index)
        };

        {
            let mut session = self.inner.session.lock();
            if self.inner.current_generation() != generation {
                return Err(PlaybackError::NoActiveSession);
            }
            session.queue = queue.into();
            session.has_more = cursor.is_some();
            session.cursor = cursor;
            session.paging_failed = paging_failed;
        }
        info!(
            playlist_id,
            video_id = %first.video_id,
            position = first.position,
            shuffle,
            "Starting playlist"
        );

        self.inner.play_with_auto_skip(first, generation).await
    }

    /// Move to the next item. `Ok(false)` when nothing is left.
    pub async fn skip_next(&self) -> Result<bool, PlaybackError> {
        let _transition = self.inner.transition.lock().await;
        Ok(self.inner.advance().await?.is_some())
    }

    /// Like [`skip_next`](Self::skip_next), but fails with `Busy` instead of
    /// waiting for a transition already in progress.
    pub async fn try_skip_next(&self) -> Result<bool, PlaybackError> {
        let Ok(_transition) = self.inner.transition.try_lock() else {
            return Err(PlaybackError::Busy);
        };
        Ok(self.inner.advance().await?.is_some())
    }

    /// Called when the current item finished playing. Marks the session
    /// exhausted when there is nothing left.
    pub async fn advance_after_completion(&self) -> Result<Option<NowPlaying>, PlaybackError> {
        let _transition = self.inner.transition.lock().await;
        let generation = self.inner.current_generation();
        let next = self.inner.advance().await?;
        if next.is_none() {
            let mut session = self.inner.session.lock();
            if self.inner.current_generation() == generation {
                session.state = PlaybackState::Exhausted;
                debug!(playlist_id = ?session.playlist_id, "Playback exhausted");
            }
        }
        Ok(next)
    }

    /// Replace the session with a standalone video. All paging state from a
    /// previous playlist is dropped.
    pub async fn load_single_video(&self, video_id: &str) -> Result<NowPlaying, PlaybackError> {
        let _transition = self.inner.transition.lock().await;
        let generation = self.inner.begin(SessionMode::SingleVideo, None, false);

        let item = PlaylistItem::new(1, video_id, "");
        self.inner.session.lock().current = Some(item.clone());

        match self.inner.resolve_item(&item.video_id).await {
            Some(streams) => {
                if !self.inner.mark_playing(generation, &streams) {
                    return Err(PlaybackError::NoActiveSession);
                }
                info!(video_id, "Playing single video");
                Ok(NowPlaying { item, streams })
            }
            None => Err(self
                .inner
                .fail(generation, PlaybackError::Unplayable(item.video_id))),
        }
    }

    /// Drop the session and return to idle. A transition still running
    /// for the old session leaves the new state alone and fails with
    /// `NoActiveSession`.
    pub fn end_session(&self) {
        let mut session = self.inner.session.lock();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        *session = Session::default();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.session.lock().snapshot()
    }

    pub fn up_next(&self) -> Vec<PlaylistItem> {
        self.inner.session.lock().queue.iter().cloned().collect()
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        let session = self.inner.session.lock();
        Some(NowPlaying {
            item: session.current.clone()?,
            streams: session.streams.clone()?,
        })
    }

    /// Wait for an opportunistic page fetch to finish, if one is running.
    pub async fn wait_for_background_paging(&self) {
        let handle = self.inner.background.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl EngineInner {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Reset to a fresh session and return its generation.
    fn begin(&self, mode: SessionMode, playlist_id: Option<&str>, shuffle: bool) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.session.lock() = Session {
            mode,
            state: PlaybackState::Loading,
            playlist_id: playlist_id.map(str::to_string),
            shuffle,
            ..Session::default()
        };
        generation
    }

    /// Record `error` on the session it belongs to. A replaced session is
    /// left untouched.
    fn fail(&self, generation: u64, error: PlaybackError) -> PlaybackError {
        let mut session = self.session.lock();
        if self.current_generation() == generation {
            session.state = PlaybackState::Error;
            session.last_error = Some(error.to_string());
        }
        error
    }

    /// `false` if the session was replaced while the item resolved.
    fn mark_playing(&self, generation: u64, streams: &Arc<ResolvedStreams>) -> bool {
        let mut session = self.session.lock();
        if self.current_generation() != generation {
            return false;
        }
        session.state = PlaybackState::Playing;
        session.streams = Some(streams.clone());
        session.consecutive_skips = 0;
        session.last_error = None;
        true
    }

    async fn fetch_page(
        &self,
        playlist_id: &str,
        cursor: Option<&ContinuationToken>,
    ) -> Result<PlaylistPage<PlaylistItem>, PageError> {
        let limit = self.config.page_timeout();
        match timeout(limit, self.playlists.fetch_page(playlist_id, cursor)).await {
            Ok(result) => result,
            Err(_) => Err(PageError::Timeout(limit)),
        }
    }

    async fn deep_start(
        &self,
        playlist_id: &str,
        target: Option<&str>,
        hint: usize,
    ) -> Result<DeepStart, PlaybackError> {
        let first = self.fetch_page(playlist_id, None).await?;
        let mut loaded = first.items;
        let mut cursor = first.continuation;
        let mut fetches = 1;

        // An empty first page with a continuation is legal upstream.
        while loaded.is_empty()
            && let Some(next) = cursor.take()
        {
            let page = self.fetch_page(playlist_id, Some(&next)).await?;
            fetches += 1;
            loaded = page.items;
            cursor = page.continuation;
        }
        if loaded.is_empty() {
            return Err(PlaybackError::EmptyPlaylist);
        }

        let Some(target) = target else {
            let index = hint.min(loaded.len() - 1);
            return Ok(DeepStart {
                loaded,
                index,
                cursor,
                paging_failed: false,
            });
        };

        if loaded.get(hint).is_some_and(|item| item.video_id == target) {
            debug!(playlist_id, hint, "Target found at hinted index");
            return Ok(DeepStart {
                loaded,
                index: hint,
                cursor,
                paging_failed: false,
            });
        }

        let mut scanned = 0;
        let mut page_error = None;
        loop {
            if let Some(offset) = loaded[scanned..]
                .iter()
                .position(|item| item.video_id == target)
            {
                debug!(playlist_id, fetches, index = scanned + offset, "Target found");
                return Ok(DeepStart {
                    loaded,
                    index: scanned + offset,
                    cursor,
                    paging_failed: false,
                });
            }
            scanned = loaded.len();

            let Some(next) = cursor.clone() else {
                break;
            };
            match self.fetch_page(playlist_id, Some(&next)).await {
                Ok(page) => {
                    fetches += 1;
                    loaded.extend(page.items);
                    cursor = page.continuation;
                }
                Err(e) => {
                    warn!(playlist_id, error = %e, "Page fetch failed while searching for target");
                    page_error = Some(e);
                    break;
                }
            }
        }

        if hint < loaded.len() {
            debug!(playlist_id, fetches, hint, "Target not found, starting at hinted index");
            return Ok(DeepStart {
                loaded,
                index: hint,
                cursor,
                paging_failed: page_error.is_some(),
            });
        }
        match page_error {
            Some(e) => Err(e.into()),
            None => Err(PlaybackError::TargetNotFound(target.to_string())),
        }
    }

    async fn advance(self: &Arc<Self>) -> Result<Option<NowPlaying>, PlaybackError> {
        let generation = self.current_generation();
        {
            let session = self.session.lock();
            match session.mode {
                SessionMode::Inactive => return Err(PlaybackError::NoActiveSession),
                SessionMode::SingleVideo => return Ok(None),
                SessionMode::Playlist => {}
            }
            // Exhaustion is terminal until a new session starts.
            if session.consecutive_skips >= self.config.max_consecutive_skips {
                return Err(PlaybackError::AutoSkipExhausted {
                    failures: session.consecutive_skips,
                });
            }
            if !session.has_next() {
                return Ok(None);
            }
        }

        match self.next_item(generation).await? {
            Some(item) => self.play_with_auto_skip(item, generation).await.map(Some),
            None => Ok(None),
        }
    }

    /// Pop the next queued item, fetching a page first if the queue is empty
    /// and more pages remain.
    async fn next_item(&self, generation: u64) -> Result<Option<PlaylistItem>, PlaybackError> {
        loop {
            {
                let mut session = self.session.lock();
                if self.current_generation() != generation {
                    return Ok(None);
                }
                if let Some(item) = session.queue.pop_front() {
                    return Ok(Some(item));
                }
                if !session.can_page() {
                    return Ok(None);
                }
            }
            self.fetch_next_page(generation, PageFetch::Blocking).await?;
        }
    }

    async fn fetch_next_page(&self, generation: u64, mode: PageFetch) -> Result<(), PageError> {
        let _page = match mode {
            PageFetch::Blocking => self.page_lock.lock().await,
            PageFetch::Background => match self.page_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => return Ok(()),
            },
        };

        let (playlist_id, cursor) = {
            let session = self.session.lock();
            if self.current_generation() != generation || !session.can_page() {
                return Ok(());
            }
            // Another fetch may have refilled the queue while we waited.
            let needed = match mode {
                PageFetch::Blocking => session.queue.is_empty(),
                PageFetch::Background => session.queue.len() <= self.config.low_water_mark,
            };
            match (needed, &session.playlist_id, &session.cursor) {
                (true, Some(id), Some(cursor)) => (id.clone(), cursor.clone()),
                _ => return Ok(()),
            }
        };

        let result = self.fetch_page(&playlist_id, Some(&cursor)).await;

        let mut session = self.session.lock();
        if self.current_generation() != generation {
            debug!(playlist_id, "Discarding page for a replaced session");
            return Ok(());
        }
        match result {
            Ok(page) => {
                debug!(
                    playlist_id,
                    items = page.items.len(),
                    more = page.has_more(),
                    background = mode == PageFetch::Background,
                    "Fetched playlist page"
                );
                session.queue.extend(page.items);
                session.has_more = page.continuation.is_some();
                session.cursor = page.continuation;
                Ok(())
            }
            Err(e) => {
                warn!(playlist_id, error = %e, "Playlist paging failed");
                session.paging_failed = true;
                Err(e)
            }
        }
    }

    fn maybe_page_in_background(self: &Arc<Self>, generation: u64) {
        let wanted = {
            let session = self.session.lock();
            session.can_page()
                && !session.queue.is_empty()
                && session.queue.len() <= self.config.low_water_mark
        };
        if !wanted {
            return;
        }

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _ = inner.fetch_next_page(generation, PageFetch::Background).await;
        });
        *self.background.lock() = Some(handle);
    }

    async fn resolve_item(&self, video_id: &str) -> Option<Arc<ResolvedStreams>> {
        if let Some(prefetcher) = &self.prefetcher
            && let Some(streams) = prefetcher.take(video_id).await
        {
            debug!(video_id, "Using prefetched streams");
            return Some(streams);
        }

        match self.streams.resolve(video_id).await {
            Ok(Some(streams)) => Some(streams),
            Ok(None) => {
                debug!(video_id, "Nothing playable");
                None
            }
            Err(e) => {
                debug!(video_id, error = %e, "Resolution failed");
                None
            }
        }
    }

    /// Play `first`, skipping forward over unplayable items until one plays
    /// or the consecutive-failure bound is hit.
    async fn play_with_auto_skip(
        self: &Arc<Self>,
        first: PlaylistItem,
        generation: u64,
    ) -> Result<NowPlaying, PlaybackError> {
        let mut item = first;
        loop {
            {
                let mut session = self.session.lock();
                if self.current_generation() != generation {
                    return Err(PlaybackError::NoActiveSession);
                }
                session.state = PlaybackState::Loading;
                session.current = Some(item.clone());
                session.streams = None;
            }

            if let Some(streams) = self.resolve_item(&item.video_id).await {
                if !self.mark_playing(generation, &streams) {
                    debug!(video_id = %item.video_id, "Session replaced while resolving");
                    return Err(PlaybackError::NoActiveSession);
                }
                let upcoming = self
                    .session
                    .lock()
                    .queue
                    .front()
                    .map(|next| next.video_id.clone());
                if let (Some(prefetcher), Some(next)) = (&self.prefetcher, upcoming) {
                    prefetcher.prefetch(&next);
                }
                self.maybe_page_in_background(generation);
                return Ok(NowPlaying { item, streams });
            }

            let failures = {
                let mut session = self.session.lock();
                if self.current_generation() != generation {
                    return Err(PlaybackError::NoActiveSession);
                }
                session.consecutive_skips += 1;
                session.consecutive_skips
            };
            warn!(video_id = %item.video_id, failures, "Skipping unplayable item");

            if failures >= self.config.max_consecutive_skips {
                return Err(self.fail(generation, PlaybackError::AutoSkipExhausted { failures }));
            }
            match self.next_item(generation).await {
                Ok(Some(next)) => item = next,
                Ok(None) => {
                    return Err(self.fail(generation, PlaybackError::Unplayable(item.video_id)));
                }
                Err(e) => return Err(self.fail(generation, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use rstest::rstest;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use stream_resolver::ResolveError;
    use tokio::sync::Semaphore;

    type PageResult = Result<PlaylistPage<PlaylistItem>, PageError>;

    #[derive(Default)]
    struct FakePlaylist {
        pages: Vec<PageResult>,
        calls: AtomicUsize,
        /// Page index that blocks until a permit is available.
        gate: Option<(usize, Arc<Semaphore>)>,
        hang: bool,
    }

    impl FakePlaylist {
        fn with_pages(sizes: &[usize]) -> Self {
            let mut next_position = 1;
            let pages = sizes
                .iter()
                .enumerate()
                .map(|(i, &size)| {
                    let items = (next_position..next_position + size as u32)
                        .map(|p| PlaylistItem::new(p, format!("video_{p}"), format!("Video {p}")))
                        .collect();
                    next_position += size as u32;
                    Ok(PlaylistPage {
                        items,
                        continuation: (i + 1 < sizes.len())
                            .then(|| ContinuationToken::new((i + 1).to_string())),
                        next_item_offset: next_position,
                    })
                })
                .collect();
            Self {
                pages,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlaylistSource for FakePlaylist {
        async fn fetch_page(
            &self,
            _playlist_id: &str,
            cursor: Option<&ContinuationToken>,
        ) -> PageResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            let index = cursor.map_or(0, |c| c.as_str().parse::<usize>().unwrap());
            if let Some((gated, gate)) = &self.gate
                && *gated == index
            {
                gate.acquire().await.unwrap().forget();
            }
            self.pages[index].clone()
        }
    }

    #[derive(Default)]
    struct FakeStreams {
        failing: Mutex<HashSet<String>>,
        attempts: Mutex<Vec<String>>,
        /// Every resolution waits for a permit.
        gate: Option<Arc<Semaphore>>,
    }

    impl FakeStreams {
        fn failing(ids: &[&str]) -> Self {
            Self {
                failing: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().clone()
        }
    }

    fn streams_for(id: &str) -> Arc<ResolvedStreams> {
        Arc::new(ResolvedStreams {
            stream_id: id.to_string(),
            video_tracks: vec![],
            audio_tracks: vec![],
            duration_secs: Some(60),
            generated_at: Utc::now(),
            timebase_version: 1,
        })
    }

    #[async_trait]
    impl StreamSource for FakeStreams {
        async fn resolve(
            &self,
            video_id: &str,
        ) -> Result<Option<Arc<ResolvedStreams>>, ResolveError> {
            self.attempts.lock().push(video_id.to_string());
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.failing.lock().contains(video_id) {
                return Err(ResolveError::extraction("unavailable"));
            }
            Ok(Some(streams_for(video_id)))
        }
    }

    #[derive(Default)]
    struct FakePrefetcher {
        triggered: Mutex<Vec<String>>,
        ready: Mutex<HashMap<String, Arc<ResolvedStreams>>>,
    }

    #[async_trait]
    impl Prefetcher for FakePrefetcher {
        fn prefetch(&self, video_id: &str) {
            self.triggered.lock().push(video_id.to_string());
        }

        async fn take(&self, video_id: &str) -> Option<Arc<ResolvedStreams>> {
            self.ready.lock().remove(video_id)
        }
    }

    fn engine(playlist: &Arc<FakePlaylist>, streams: &Arc<FakeStreams>) -> PlaylistEngine {
        PlaylistEngine::builder(playlist.clone(), streams.clone()).build()
    }

    fn current_id(engine: &PlaylistEngine) -> String {
        engine.snapshot().current.unwrap().video_id
    }

    fn queue_ids(engine: &PlaylistEngine) -> Vec<String> {
        engine.up_next().into_iter().map(|i| i.video_id).collect()
    }

    #[rstest]
    #[case(0, false, false, false, false)]
    #[case(0, true, false, false, true)]
    #[case(0, true, true, false, false)]
    #[case(3, false, false, false, true)]
    #[case(3, true, true, false, true)]
    #[case(0, true, false, true, false)]
    #[case(2, true, false, true, true)]
    fn has_next_table(
        #[case] queue_len: usize,
        #[case] has_more: bool,
        #[case] paging_failed: bool,
        #[case] shuffle: bool,
        #[case] expected: bool,
    ) {
        assert_eq!(has_next(queue_len, has_more, paging_failed, shuffle), expected);
    }

    #[tokio::test]
    async fn hinted_target_needs_one_fetch() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[10]));
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        let now = engine
            .start_playlist("PL1", Some("video_4"), 3, false)
            .await
            .unwrap();
        assert_eq!(now.item.video_id, "video_4");
        assert_eq!(engine.up_next().len(), 6);
        assert_eq!(playlist.calls(), 1);
        assert_eq!(engine.snapshot().state, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn target_on_second_page_pages_until_found() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[10, 10]));
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        engine
            .start_playlist("PL1", Some("video_15"), 0, false)
            .await
            .unwrap();
        assert_eq!(current_id(&engine), "video_15");
        assert_eq!(playlist.calls(), 2);
        assert_eq!(
            queue_ids(&engine),
            vec!["video_16", "video_17", "video_18", "video_19", "video_20"]
        );
    }

    #[tokio::test]
    async fn missing_target_falls_back_to_hint() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[10]));
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        engine
            .start_playlist("PL1", Some("nope"), 4, false)
            .await
            .unwrap();
        assert_eq!(current_id(&engine), "video_5");

        let err = engine
            .start_playlist("PL1", Some("nope"), 20, false)
            .await
            .unwrap_err();
        assert_eq!(err, PlaybackError::TargetNotFound("nope".into()));
        assert_eq!(engine.snapshot().state, PlaybackState::Error);
    }

    #[tokio::test]
    async fn no_target_clamps_hint() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[3]));
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        engine.start_playlist("PL1", None, 99, false).await.unwrap();
        assert_eq!(current_id(&engine), "video_3");
        assert!(!engine.snapshot().has_next);
    }

    #[tokio::test]
    async fn empty_playlist_is_an_error() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[0]));
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        let err = engine.start_playlist("PL1", None, 0, false).await.unwrap_err();
        assert_eq!(err, PlaybackError::EmptyPlaylist);
        assert_eq!(engine.snapshot().state, PlaybackState::Error);
    }

    #[tokio::test]
    async fn empty_queue_with_more_pages_fetches_before_advancing() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[2, 2]));
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        engine
            .start_playlist("PL1", Some("video_2"), 1, false)
            .await
            .unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.queue_len, 0);
        assert!(snapshot.has_next);
        assert_eq!(playlist.calls(), 1);

        assert!(engine.skip_next().await.unwrap());
        assert_eq!(current_id(&engine), "video_3");
        assert_eq!(queue_ids(&engine), vec!["video_4"]);
        assert_eq!(playlist.calls(), 2);
    }

    #[tokio::test]
    async fn low_queue_pages_in_background() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[8, 10]));
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        engine.start_playlist("PL1", None, 0, false).await.unwrap();
        assert!(engine.skip_next().await.unwrap());
        engine.wait_for_background_paging().await;
        assert_eq!(playlist.calls(), 1);

        // Queue drops to five.
        assert!(engine.skip_next().await.unwrap());
        engine.wait_for_background_paging().await;
        assert_eq!(playlist.calls(), 2);
        assert_eq!(engine.up_next().len(), 15);
        assert!(!engine.snapshot().has_more_pages);
    }

    #[tokio::test]
    async fn single_failure_is_skipped() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[3]));
        let streams = Arc::new(FakeStreams::failing(&["video_2"]));
        let engine = engine(&playlist, &streams);

        engine.start_playlist("PL1", None, 0, false).await.unwrap();
        assert!(engine.skip_next().await.unwrap());

        assert_eq!(current_id(&engine), "video_3");
        assert!(engine.up_next().is_empty());
        assert_eq!(engine.snapshot().consecutive_skips, 0);
    }

    #[tokio::test]
    async fn consecutive_failures_stop_at_the_bound() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[10]));
        let streams = Arc::new(FakeStreams::failing(&["video_2", "video_3", "video_4"]));
        let engine = engine(&playlist, &streams);

        engine.start_playlist("PL1", None, 0, false).await.unwrap();
        let err = engine.skip_next().await.unwrap_err();

        assert_eq!(err, PlaybackError::AutoSkipExhausted { failures: 3 });
        assert_eq!(
            streams.attempts(),
            vec!["video_1", "video_2", "video_3", "video_4"]
        );
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Error);
        assert_eq!(snapshot.queue_len, 6);
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("playback could not proceed past 3 consecutive failures")
        );
    }

    #[tokio::test]
    async fn exhausted_session_stays_stopped() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[10]));
        let streams = Arc::new(FakeStreams::failing(&[
            "video_2", "video_3", "video_4", "video_5",
        ]));
        let engine = engine(&playlist, &streams);

        engine.start_playlist("PL1", None, 0, false).await.unwrap();
        assert!(engine.skip_next().await.is_err());

        let exhausted = PlaybackError::AutoSkipExhausted { failures: 3 };
        assert_eq!(engine.skip_next().await, Err(exhausted.clone()));
        assert_eq!(engine.try_skip_next().await, Err(exhausted.clone()));
        assert_eq!(
            engine.advance_after_completion().await.unwrap_err(),
            exhausted
        );

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.consecutive_skips, 3);
        assert_eq!(snapshot.state, PlaybackState::Error);
        assert!(!streams.attempts().contains(&"video_5".to_string()));

        // A new session starts with a fresh budget.
        engine.start_playlist("PL1", None, 5, false).await.unwrap();
        assert_eq!(current_id(&engine), "video_6");
        assert_eq!(engine.snapshot().consecutive_skips, 0);
    }

    #[tokio::test]
    async fn ended_session_is_not_revived_by_a_running_transition() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[3]));
        let gate = Arc::new(Semaphore::new(0));
        let streams = Arc::new(FakeStreams {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let engine = engine(&playlist, &streams);

        let starting = tokio::spawn({
            let engine = engine.clone();
            async move { engine.start_playlist("PL1", None, 0, false).await.map(|_| ()) }
        });
        while streams.attempts().is_empty() {
            tokio::task::yield_now().await;
        }

        engine.end_session();
        gate.add_permits(1);

        assert_eq!(starting.await.unwrap(), Err(PlaybackError::NoActiveSession));
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.mode, SessionMode::Inactive);
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert!(snapshot.current.is_none());
        assert!(engine.now_playing().is_none());
    }

    #[tokio::test]
    async fn failing_last_item_is_unplayable() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[2]));
        let streams = Arc::new(FakeStreams::failing(&["video_2"]));
        let engine = engine(&playlist, &streams);

        engine.start_playlist("PL1", None, 0, false).await.unwrap();
        let err = engine.skip_next().await.unwrap_err();
        assert_eq!(err, PlaybackError::Unplayable("video_2".into()));
    }

    #[tokio::test]
    async fn shuffle_only_uses_loaded_items() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[5, 5]));
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        engine.start_playlist("PL1", None, 0, true).await.unwrap();
        let mut queued = queue_ids(&engine);
        queued.sort();
        assert_eq!(queued, vec!["video_2", "video_3", "video_4", "video_5"]);

        for _ in 0..4 {
            assert!(engine.skip_next().await.unwrap());
        }
        assert!(!engine.snapshot().has_next);
        assert!(!engine.skip_next().await.unwrap());
        engine.wait_for_background_paging().await;
        assert_eq!(playlist.calls(), 1);
    }

    #[tokio::test]
    async fn page_failure_stops_paging() {
        let mut playlist = FakePlaylist::with_pages(&[2, 2]);
        playlist.pages[1] = Err(PageError::Transport("boom".into()));
        let playlist = Arc::new(playlist);
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        engine
            .start_playlist("PL1", Some("video_2"), 1, false)
            .await
            .unwrap();
        let err = engine.skip_next().await.unwrap_err();
        assert!(matches!(err, PlaybackError::PagingFailed(PageError::Transport(_))));

        let snapshot = engine.snapshot();
        assert!(snapshot.paging_failed);
        assert!(!snapshot.has_next);
        assert_eq!(snapshot.state, PlaybackState::Playing);
        assert!(!engine.skip_next().await.unwrap());
        assert_eq!(playlist.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn page_fetch_times_out() {
        let playlist = Arc::new(FakePlaylist {
            hang: true,
            ..Default::default()
        });
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        let err = engine.start_playlist("PL1", None, 0, false).await.unwrap_err();
        assert_eq!(
            err,
            PlaybackError::PagingFailed(PageError::Timeout(Duration::from_secs(15)))
        );
    }

    #[tokio::test]
    async fn single_video_clears_paging_state() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[3, 10, 10]));
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        engine.start_playlist("PL1", None, 0, false).await.unwrap();
        engine.wait_for_background_paging().await;
        assert!(engine.snapshot().has_more_pages);

        engine.load_single_video("solo").await.unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.mode, SessionMode::SingleVideo);
        assert_eq!(snapshot.current.unwrap().video_id, "solo");
        assert_eq!(snapshot.queue_len, 0);
        assert!(!snapshot.has_more_pages);
        assert!(!snapshot.paging_failed);
        assert_eq!(snapshot.consecutive_skips, 0);
        assert!(!snapshot.has_next);

        let calls = playlist.calls();
        assert!(!engine.skip_next().await.unwrap());
        assert_eq!(playlist.calls(), calls);
    }

    #[tokio::test]
    async fn stale_background_page_is_discarded() {
        let gate = Arc::new(Semaphore::new(0));
        let mut playlist = FakePlaylist::with_pages(&[3, 10]);
        playlist.gate = Some((1, gate.clone()));
        let playlist = Arc::new(playlist);
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        engine.start_playlist("PL1", None, 0, false).await.unwrap();
        while playlist.calls() < 2 {
            tokio::task::yield_now().await;
        }
        engine.load_single_video("solo").await.unwrap();

        gate.add_permits(1);
        engine.wait_for_background_paging().await;
        assert_eq!(playlist.calls(), 2);
        assert_eq!(engine.snapshot().queue_len, 0);
    }

    #[tokio::test]
    async fn completion_at_end_exhausts() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[2]));
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        engine.start_playlist("PL1", None, 0, false).await.unwrap();
        let next = engine.advance_after_completion().await.unwrap();
        assert_eq!(next.unwrap().item.video_id, "video_2");

        assert!(engine.advance_after_completion().await.unwrap().is_none());
        assert_eq!(engine.snapshot().state, PlaybackState::Exhausted);
    }

    #[tokio::test]
    async fn skip_without_session_fails() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[2]));
        let streams = Arc::new(FakeStreams::default());
        let engine = engine(&playlist, &streams);

        assert_eq!(engine.skip_next().await, Err(PlaybackError::NoActiveSession));
        engine.start_playlist("PL1", None, 0, false).await.unwrap();
        engine.end_session();
        assert_eq!(engine.snapshot().mode, SessionMode::Inactive);
    }

    #[tokio::test]
    async fn next_item_is_prefetched_and_used() {
        let playlist = Arc::new(FakePlaylist::with_pages(&[3]));
        let streams = Arc::new(FakeStreams::default());
        let prefetcher = Arc::new(FakePrefetcher::default());
        let engine = PlaylistEngine::builder(playlist.clone(), streams.clone())
            .prefetcher(prefetcher.clone())
            .build();

        engine.start_playlist("PL1", None, 0, false).await.unwrap();
        assert_eq!(*prefetcher.triggered.lock(), vec!["video_2"]);

        prefetcher
            .ready
            .lock()
            .insert("video_2".into(), streams_for("video_2"));
        assert!(engine.skip_next().await.unwrap());
        assert_eq!(current_id(&engine), "video_2");
        assert_eq!(streams.attempts(), vec!["video_1"]);
        assert_eq!(*prefetcher.triggered.lock(), vec!["video_2", "video_3"]);
    }
}

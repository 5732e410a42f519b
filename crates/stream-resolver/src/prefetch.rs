// Prefetch: speculative resolution ahead of playback.
//
// Each prefetch is a task tied to a child of a caller-supplied scope token.
// The result is handed out once: the slot is removed by whoever consumes it,
// so a second consumer gets None and resolves fresh.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use media_types::{ResolvedStreams, VideoId};

use crate::config::PrefetchConfig;
use crate::rate_limiter::RequestKind;
use crate::resolver::StreamResolver;

type PrefetchOutput = Option<Arc<ResolvedStreams>>;

/// Slot key for `video_id`, or `None` if it is not a valid id.
fn slot_key(video_id: &str) -> Option<String> {
    VideoId::parse(video_id).map(|id| id.as_str().to_string())
}

struct PrefetchSlot {
    handle: JoinHandle<PrefetchOutput>,
    token: CancellationToken,
}

impl PrefetchSlot {
    fn cancel(&self) {
        self.token.cancel();
        self.handle.abort();
    }
}

#[derive(Default)]
struct Slots {
    entries: HashMap<String, PrefetchSlot>,
    order: VecDeque<String>,
}

impl Slots {
    fn remove(&mut self, video_id: &str) -> Option<PrefetchSlot> {
        let slot = self.entries.remove(video_id)?;
        self.order.retain(|id| id != video_id);
        Some(slot)
    }
}

/// Holds at most `max_entries` prefetches, evicting the oldest.
pub struct PrefetchService {
    resolver: StreamResolver,
    config: PrefetchConfig,
    slots: Mutex<Slots>,
}

impl PrefetchService {
    pub fn new(resolver: StreamResolver, config: PrefetchConfig) -> Self {
        Self {
            resolver,
            config,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Start resolving `video_id` in the background under `scope`.
    ///
    /// Returns `false` if the id is malformed or a prefetch for it already exists.
    pub fn trigger_prefetch(&self, video_id: &str, scope: &CancellationToken) -> bool {
        let Some(id) = VideoId::parse(video_id) else {
            return false;
        };
        let key = id.as_str().to_string();

        let mut slots = self.slots.lock();
        if slots.entries.contains_key(&key) {
            return false;
        }

        let token = scope.child_token();
        let handle = tokio::spawn(prefetch_task(
            self.resolver.clone(),
            id,
            token.clone(),
            self.config.prefetch_timeout(),
        ));

        while slots.entries.len() >= self.config.max_entries.max(1) {
            let Some(oldest) = slots.order.pop_front() else {
                break;
            };
            if let Some(evicted) = slots.entries.remove(&oldest) {
                debug!(video_id = %oldest, "Evicting oldest prefetch");
                evicted.cancel();
            }
        }

        slots.order.push_back(key.clone());
        slots.entries.insert(key, PrefetchSlot { handle, token });
        true
    }

    /// Take the prefetch for `video_id`, waiting up to the await timeout if it
    /// is still running. `None` if there is none, or it failed, was cancelled
    /// or did not finish in time.
    pub async fn await_or_consume_prefetch(&self, video_id: &str) -> PrefetchOutput {
        let key = slot_key(video_id)?;
        let mut slot = self.slots.lock().remove(&key)?;

        match timeout(self.config.await_timeout(), &mut slot.handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                debug!(video_id, cancelled = e.is_cancelled(), "Prefetch task ended without result");
                None
            }
            Err(_) => {
                debug!(video_id, "Timed out waiting for prefetch");
                slot.cancel();
                None
            }
        }
    }

    /// Take the prefetch only if it already finished; never waits.
    pub fn consume_prefetch(&self, video_id: &str) -> PrefetchOutput {
        let key = slot_key(video_id)?;
        let mut slots = self.slots.lock();
        if !slots.entries.get(&key)?.handle.is_finished() {
            return None;
        }
        let mut slot = slots.remove(&key)?;
        drop(slots);
        (&mut slot.handle).now_or_never()?.ok().flatten()
    }

    pub fn is_prefetch_in_flight(&self, video_id: &str) -> bool {
        let Some(key) = slot_key(video_id) else {
            return false;
        };
        self.slots
            .lock()
            .entries
            .get(&key)
            .is_some_and(|slot| !slot.handle.is_finished())
    }

    pub fn has_prefetch(&self, video_id: &str) -> bool {
        slot_key(video_id).is_some_and(|key| self.slots.lock().entries.contains_key(&key))
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cancel_prefetch(&self, video_id: &str) -> bool {
        let Some(key) = slot_key(video_id) else {
            return false;
        };
        match self.slots.lock().remove(&key) {
            Some(slot) => {
                slot.cancel();
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&self) {
        let mut slots = self.slots.lock();
        for (_, slot) in slots.entries.drain() {
            slot.cancel();
        }
        slots.order.clear();
    }
}

async fn prefetch_task(
    resolver: StreamResolver,
    id: VideoId,
    token: CancellationToken,
    limit: std::time::Duration,
) -> PrefetchOutput {
    let resolve = resolver.resolve_with_kind(id.as_str(), false, RequestKind::Prefetch);
    tokio::select! {
        _ = token.cancelled() => {
            debug!(video_id = %id, "Prefetch cancelled");
            None
        }
        result = timeout(limit, resolve) => match result {
            Ok(Ok(streams)) => streams,
            Ok(Err(e)) => {
                debug!(video_id = %id, error = %e, "Prefetch failed");
                None
            }
            Err(_) => {
                debug!(video_id = %id, "Prefetch timed out");
                None
            }
        },
    }
}

//! Rate limiting for extraction calls.
//!
//! Sliding-window budgets: a global budget across all videos plus a per-video
//! budget. Prefetches leave a reserve untouched so speculative work cannot use
//! up the slots that playback needs. Automatic recovery has its own small
//! per-video budget and does not count against the global one.
//!
//! On top of the windows, requests of one kind for one video are spaced by a
//! minimum interval, and repeated playback attempts back off exponentially
//! until an extraction succeeds.
//!
//! The limiter never sleeps. A denial reports how long until a slot frees up
//! and the caller decides whether to wait or fail.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::RateLimiterConfig;

/// Forget per-video histories once this many videos are tracked.
const PRUNE_VIDEO_THRESHOLD: usize = 256;

/// Backoff stops doubling after this many consecutive attempts.
const MAX_BACKOFF_DOUBLINGS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// The user is waiting for this video.
    Playback,
    /// Speculative; refused once a budget is nearly used up.
    Prefetch,
    /// A retry after a playback failure.
    AutoRecovery,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playback => "playback",
            Self::Prefetch => "prefetch",
            Self::AutoRecovery => "auto_recovery",
        }
    }
}

/// Why a request was pushed back rather than refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayReason {
    MinInterval,
    Backoff,
}

impl DelayReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MinInterval => "minimum_interval",
            Self::Backoff => "exponential_backoff",
        }
    }
}

impl fmt::Display for DelayReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    /// Too early for this video; try again after `retry_after`.
    Delayed {
        retry_after: Duration,
        reason: DelayReason,
    },
    /// A window budget is used up.
    Denied { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::Delayed { retry_after, .. } | Self::Denied { retry_after } => Some(*retry_after),
        }
    }
}

#[derive(Debug, Default)]
struct VideoHistory {
    requests: VecDeque<Instant>,
    recoveries: VecDeque<Instant>,
    last_attempt: HashMap<RequestKind, Instant>,
    /// Playback attempts since the last successful extraction.
    consecutive_playback: u32,
}

impl VideoHistory {
    fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.recoveries.is_empty()
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    global: VecDeque<Instant>,
    videos: HashMap<String, VideoHistory>,
}

/// Sliding-window limiter for outbound extraction requests.
#[derive(Debug)]
pub struct ExtractionRateLimiter {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

impl ExtractionRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Try to take a slot for `video_id`. An allowed request is counted
    /// immediately.
    pub fn acquire(&self, video_id: &str, kind: RequestKind) -> RateLimitDecision {
        let now = Instant::now();
        let global_window = self.config.global_window();
        let video_window = self.config.per_video_window();

        let mut state = self.state.lock();
        prune(&mut state.global, now, global_window);

        if state.videos.len() > PRUNE_VIDEO_THRESHOLD {
            state.videos.retain(|_, history| {
                prune(&mut history.requests, now, video_window);
                prune(&mut history.recoveries, now, video_window);
                !history.is_empty()
            });
        }

        let LimiterState { global, videos } = &mut *state;
        let history = videos.entry(video_id.to_string()).or_default();
        prune(&mut history.requests, now, video_window);
        prune(&mut history.recoveries, now, video_window);

        let reserve = if kind == RequestKind::Prefetch {
            self.config.prefetch_reserve
        } else {
            0
        };

        // Recovery never waits on other videos.
        if kind != RequestKind::AutoRecovery {
            let global_limit = self.config.global_max_requests.saturating_sub(reserve);
            if let Some(retry_after) = wait_for_slot(global, global_limit, global_window, now) {
                return denied(video_id, kind, retry_after);
            }
        }

        if let Some(retry_after) = self.interval_delay(history, kind, now) {
            return delayed(video_id, kind, retry_after, DelayReason::MinInterval);
        }

        let video_wait = match kind {
            RequestKind::AutoRecovery => wait_for_slot(
                &history.recoveries,
                self.config.recovery_max_requests,
                video_window,
                now,
            ),
            RequestKind::Playback | RequestKind::Prefetch => {
                let video_limit = self.config.per_video_max_requests.saturating_sub(reserve);
                wait_for_slot(&history.requests, video_limit, video_window, now)
            }
        };
        if let Some(retry_after) = video_wait {
            return denied(video_id, kind, retry_after);
        }

        if kind == RequestKind::Playback
            && let Some(retry_after) = self.backoff_delay(history, now)
        {
            return delayed(video_id, kind, retry_after, DelayReason::Backoff);
        }

        match kind {
            RequestKind::AutoRecovery => history.recoveries.push_back(now),
            RequestKind::Playback | RequestKind::Prefetch => {
                history.requests.push_back(now);
                global.push_back(now);
            }
        }
        if kind == RequestKind::Playback {
            history.consecutive_playback += 1;
        }
        history.last_attempt.insert(kind, now);
        trace!(video_id, kind = kind.as_str(), "Extraction request allowed");
        RateLimitDecision::Allowed
    }

    /// Clear the playback backoff for `video_id` after a successful
    /// extraction. Window counts are kept.
    pub fn on_extraction_success(&self, video_id: &str) {
        if let Some(history) = self.state.lock().videos.get_mut(video_id) {
            history.consecutive_playback = 0;
        }
    }

    fn interval_delay(
        &self,
        history: &VideoHistory,
        kind: RequestKind,
        now: Instant,
    ) -> Option<Duration> {
        let last = history.last_attempt.get(&kind)?;
        // The first recovery in a window may follow immediately.
        if kind == RequestKind::AutoRecovery && history.recoveries.is_empty() {
            return None;
        }
        let ready_at = *last + self.config.min_interval();
        (ready_at > now).then(|| ready_at - now)
    }

    fn backoff_delay(&self, history: &VideoHistory, now: Instant) -> Option<Duration> {
        if history.consecutive_playback == 0 {
            return None;
        }
        let last = history.last_attempt.get(&RequestKind::Playback)?;
        let ready_at = *last + self.backoff_for(history.consecutive_playback);
        (ready_at > now).then(|| ready_at - now)
    }

    /// Base delay doubled per earlier consecutive attempt, capped.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let doublings = attempts.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
        self.config
            .backoff_base()
            .saturating_mul(1u32 << doublings)
            .min(self.config.max_backoff())
    }

    /// Requests counted against `video_id` in the current per-video window,
    /// recoveries included.
    pub fn attempt_count(&self, video_id: &str) -> usize {
        let now = Instant::now();
        let window = self.config.per_video_window();
        let mut state = self.state.lock();
        match state.videos.get_mut(video_id) {
            Some(history) => {
                prune(&mut history.requests, now, window);
                prune(&mut history.recoveries, now, window);
                history.requests.len() + history.recoveries.len()
            }
            None => 0,
        }
    }

    pub fn global_attempt_count(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        prune(&mut state.global, now, self.config.global_window());
        state.global.len()
    }

    /// Drop the per-video history of `video_id`. Global counts are kept.
    pub fn reset_for_video(&self, video_id: &str) {
        self.state.lock().videos.remove(video_id);
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.global.clear();
        state.videos.clear();
    }
}

impl Default for ExtractionRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

fn denied(video_id: &str, kind: RequestKind, retry_after: Duration) -> RateLimitDecision {
    debug!(
        video_id,
        kind = kind.as_str(),
        retry_after_ms = retry_after.as_millis() as u64,
        "Extraction request rate limited"
    );
    RateLimitDecision::Denied { retry_after }
}

fn delayed(
    video_id: &str,
    kind: RequestKind,
    retry_after: Duration,
    reason: DelayReason,
) -> RateLimitDecision {
    debug!(
        video_id,
        kind = kind.as_str(),
        reason = reason.as_str(),
        retry_after_ms = retry_after.as_millis() as u64,
        "Extraction request delayed"
    );
    RateLimitDecision::Delayed {
        retry_after,
        reason,
    }
}

fn prune(history: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = history.front() {
        if *front + window <= now {
            history.pop_front();
        } else {
            break;
        }
    }
}

/// `None` if another request fits under `limit`, else how long until one does.
fn wait_for_slot(
    history: &VecDeque<Instant>,
    limit: usize,
    window: Duration,
    now: Instant,
) -> Option<Duration> {
    if history.len() < limit {
        return None;
    }
    let blocking = history.len() - limit;
    Some(
        history
            .get(blocking)
            .map(|at| (*at + window).saturating_duration_since(now))
            .unwrap_or(window),
    )
}

//! Serde-friendly configuration for the resolver components.
//!
//! Durations are stored as plain integers (`*_ms` / `*_secs`) and exposed as
//! [`Duration`] through accessor methods.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// TTL and capacity of one cache bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl BucketConfig {
    pub const fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            ttl_secs,
            max_entries,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_streams_bucket")]
    pub streams: BucketConfig,
    #[serde(default = "default_videos_bucket")]
    pub videos: BucketConfig,
    #[serde(default = "default_long_bucket")]
    pub channels: BucketConfig,
    #[serde(default = "default_long_bucket")]
    pub playlists: BucketConfig,
    /// Generated DASH manifests.
    #[serde(default = "default_manifests_bucket")]
    pub manifests: BucketConfig,
}

fn default_streams_bucket() -> BucketConfig {
    BucketConfig::new(30 * 60, 100)
}

fn default_videos_bucket() -> BucketConfig {
    BucketConfig::new(30 * 60, 500)
}

fn default_long_bucket() -> BucketConfig {
    BucketConfig::new(60 * 60, 200)
}

fn default_manifests_bucket() -> BucketConfig {
    BucketConfig::new(2 * 60, 5)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            streams: default_streams_bucket(),
            videos: default_videos_bucket(),
            channels: default_long_bucket(),
            playlists: default_long_bucket(),
            manifests: default_manifests_bucket(),
        }
    }
}

/// Budgets for outbound extraction calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Requests allowed across all videos per global window.
    #[serde(default = "default_global_max")]
    pub global_max_requests: usize,
    #[serde(default = "default_global_window_secs")]
    pub global_window_secs: u64,
    /// Requests allowed for one video per per-video window.
    #[serde(default = "default_per_video_max")]
    pub per_video_max_requests: usize,
    #[serde(default = "default_per_video_window_secs")]
    pub per_video_window_secs: u64,
    /// Slots kept free from prefetches so playback is never starved.
    #[serde(default = "default_prefetch_reserve")]
    pub prefetch_reserve: usize,
    /// Separate per-video budget for automatic recovery attempts.
    #[serde(default = "default_recovery_max")]
    pub recovery_max_requests: usize,
    /// Spacing between requests of the same kind for one video.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    /// First step of the backoff for repeated playback attempts.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_global_max() -> usize {
    10
}

fn default_global_window_secs() -> u64 {
    60
}

fn default_per_video_max() -> usize {
    3
}

fn default_per_video_window_secs() -> u64 {
    5 * 60
}

fn default_prefetch_reserve() -> usize {
    1
}

fn default_recovery_max() -> usize {
    2
}

fn default_min_interval_secs() -> u64 {
    30
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            global_max_requests: default_global_max(),
            global_window_secs: default_global_window_secs(),
            per_video_max_requests: default_per_video_max(),
            per_video_window_secs: default_per_video_window_secs(),
            prefetch_reserve: default_prefetch_reserve(),
            recovery_max_requests: default_recovery_max(),
            min_interval_secs: default_min_interval_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RateLimiterConfig {
    pub fn global_window(&self) -> Duration {
        Duration::from_secs(self.global_window_secs)
    }

    pub fn per_video_window(&self) -> Duration {
        Duration::from_secs(self.per_video_window_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Upper bound for a single extraction attempt.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Retries after a transport failure or timeout.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Bumping this invalidates every cached stream bundle.
    #[serde(default = "default_timebase_version")]
    pub timebase_version: u32,
    /// How many rate-limit denials the owner waits out before failing.
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
    /// Denials asking for a longer wait fail fast.
    #[serde(default = "default_max_backoff_wait_ms")]
    pub max_backoff_wait_ms: u64,
}

fn default_attempt_timeout_ms() -> u64 {
    20_000
}

fn default_max_retries() -> u32 {
    1
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_timebase_version() -> u32 {
    1
}

fn default_max_rate_limit_waits() -> u32 {
    2
}

fn default_max_backoff_wait_ms() -> u64 {
    5_000
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timebase_version: default_timebase_version(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
            max_backoff_wait_ms: default_max_backoff_wait_ms(),
        }
    }
}

impl ResolverConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn max_backoff_wait(&self) -> Duration {
        Duration::from_millis(self.max_backoff_wait_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchConfig {
    #[serde(default = "default_max_prefetches")]
    pub max_entries: usize,
    #[serde(default = "default_prefetch_timeout_ms")]
    pub prefetch_timeout_ms: u64,
    #[serde(default = "default_await_timeout_ms")]
    pub await_timeout_ms: u64,
}

fn default_max_prefetches() -> usize {
    5
}

fn default_prefetch_timeout_ms() -> u64 {
    8_000
}

fn default_await_timeout_ms() -> u64 {
    3_000
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_prefetches(),
            prefetch_timeout_ms: default_prefetch_timeout_ms(),
            await_timeout_ms: default_await_timeout_ms(),
        }
    }
}

impl PrefetchConfig {
    pub fn prefetch_timeout(&self) -> Duration {
        Duration::from_millis(self.prefetch_timeout_ms)
    }

    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }
}

/// Everything the resolver side of the engine needs, in one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
}

//! Stream resolution engine.
//!
//! Turns video ids into playable tracks against a rate-limited extraction
//! service: at most one resolution per id is in flight at a time, results are
//! cached with a TTL, and transport failures get one retry. Also hosts the
//! prefetch service and batched metadata lookups.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod invidious;
mod metadata;
pub mod metrics;
pub mod prefetch;
pub mod rate_limiter;
pub mod resolver;
pub mod retry;
pub mod single_flight;
pub mod transport;

pub use cache::{CacheEntry, CacheStats, MetadataCache, TtlBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BucketConfig, CacheConfig, EngineConfig, PrefetchConfig, RateLimiterConfig, ResolverConfig,
};
pub use error::ResolveError;
pub use invidious::InvidiousTransport;
pub use metrics::{MetricsSink, MetricsSnapshot, NoopMetrics, ResolverMetrics};
pub use prefetch::PrefetchService;
pub use rate_limiter::{DelayReason, ExtractionRateLimiter, RateLimitDecision, RequestKind};
pub use resolver::{ResolveResult, StreamResolver, StreamResolverBuilder};
pub use retry::RetryPolicy;
pub use single_flight::{Flight, FlightResult, SingleFlight};
pub use transport::{ExtractionTransport, RawStreams};

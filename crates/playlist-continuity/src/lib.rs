//! Continuous playback across a paginated playlist.
//!
//! [`PlaylistEngine`] owns one playback session: it finds the starting item,
//! loads further pages as the queue drains, and skips past a bounded number
//! of unplayable items before giving up.

pub mod config;
pub mod error;
pub mod session;
pub mod source;

pub use config::ContinuityConfig;
pub use error::{PageError, PlaybackError};
pub use session::{
    NowPlaying, PlaybackState, PlaylistEngine, PlaylistEngineBuilder, SessionMode,
    SessionSnapshot, has_next,
};
pub use source::{PlaylistSource, Prefetcher, ScopedPrefetcher, StreamSource};

use std::time::Duration;

use thiserror::Error;

/// Failure to fetch one playlist page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("page fetch failed: {0}")]
    Transport(String),

    #[error("playlist not found")]
    NotFound,

    #[error("page fetch timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("playlist is empty")]
    EmptyPlaylist,

    #[error("video {0} is not in the playlist")]
    TargetNotFound(String),

    #[error("could not load more playlist items: {0}")]
    PagingFailed(#[from] PageError),

    #[error("another playback transition is in progress")]
    Busy,

    #[error("playback could not proceed past {failures} consecutive failures")]
    AutoSkipExhausted { failures: u32 },

    /// The last remaining item failed and there is nothing to skip to.
    #[error("video {0} could not be played")]
    Unplayable(String),

    #[error("no active playback session")]
    NoActiveSession,
}

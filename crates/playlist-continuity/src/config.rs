use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuityConfig {
    /// Queue depth at or below which the next page is fetched in the background.
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,
    /// Consecutive unplayable items tolerated before playback stops.
    #[serde(default = "default_max_consecutive_skips")]
    pub max_consecutive_skips: u32,
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,
}

fn default_low_water_mark() -> usize {
    5
}

fn default_max_consecutive_skips() -> u32 {
    3
}

fn default_page_timeout_ms() -> u64 {
    15_000
}

impl ContinuityConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            low_water_mark: default_low_water_mark(),
            max_consecutive_skips: default_max_consecutive_skips(),
            page_timeout_ms: default_page_timeout_ms(),
        }
    }
}

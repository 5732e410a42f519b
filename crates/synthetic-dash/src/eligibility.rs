//! Whether a progressive stream can be wrapped in a synthetic DASH manifest.
//!
//! Pure functions of track metadata. Every failing check is reported, not just
//! the first, so diagnostics show the full picture.

use std::fmt;

use serde::{Deserialize, Serialize};

use media_types::{AudioTrack, DeliveryMethod, SegmentIndex, VideoTrack};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IneligibleReason {
    NoContent,
    NotProgressiveDelivery,
    MuxedStream,
    NoMetadataForManifest,
    InvalidInitRange,
    InvalidIndexRange,
    NoDuration,
}

impl IneligibleReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoContent => "NO_CONTENT",
            Self::NotProgressiveDelivery => "NOT_PROGRESSIVE_DELIVERY",
            Self::MuxedStream => "MUXED_STREAM",
            Self::NoMetadataForManifest => "NO_METADATA_FOR_MANIFEST",
            Self::InvalidInitRange => "INVALID_INIT_RANGE",
            Self::InvalidIndexRange => "INVALID_INDEX_RANGE",
            Self::NoDuration => "NO_DURATION",
        }
    }
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub eligible: bool,
    /// In check order; empty when eligible.
    pub reasons: Vec<IneligibleReason>,
}

impl EligibilityResult {
    fn from_reasons(reasons: Vec<IneligibleReason>) -> Self {
        Self {
            eligible: reasons.is_empty(),
            reasons,
        }
    }

    pub fn has(&self, reason: IneligibleReason) -> bool {
        self.reasons.contains(&reason)
    }

    /// Comma-separated reason codes, for logs.
    pub fn codes(&self) -> String {
        self.reasons
            .iter()
            .map(IneligibleReason::code)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// `stream_duration_secs` is the duration of the resolved stream, if known.
pub fn check_video_eligibility(
    track: &VideoTrack,
    stream_duration_secs: Option<u64>,
) -> EligibilityResult {
    let mut reasons = Vec::new();
    check_common(
        &track.url,
        track.delivery,
        Some(track.is_video_only),
        track.segment_index.as_ref(),
        stream_duration_secs,
        &mut reasons,
    );
    EligibilityResult::from_reasons(reasons)
}

pub fn check_audio_eligibility(
    track: &AudioTrack,
    stream_duration_secs: Option<u64>,
) -> EligibilityResult {
    let mut reasons = Vec::new();
    check_common(
        &track.url,
        track.delivery,
        None,
        track.segment_index.as_ref(),
        stream_duration_secs,
        &mut reasons,
    );
    EligibilityResult::from_reasons(reasons)
}

fn check_common(
    url: &str,
    delivery: DeliveryMethod,
    video_only: Option<bool>,
    index: Option<&SegmentIndex>,
    stream_duration_secs: Option<u64>,
    reasons: &mut Vec<IneligibleReason>,
) {
    if url.trim().is_empty() {
        reasons.push(IneligibleReason::NoContent);
    }
    if !delivery.supports_byte_ranges() {
        reasons.push(IneligibleReason::NotProgressiveDelivery);
    }
    // Muxed streams already seek acceptably.
    if video_only == Some(false) {
        reasons.push(IneligibleReason::MuxedStream);
    }

    match index {
        None => {
            reasons.push(IneligibleReason::NoMetadataForManifest);
            reasons.push(IneligibleReason::InvalidInitRange);
            reasons.push(IneligibleReason::InvalidIndexRange);
        }
        Some(index) => {
            if index.itag == 0 {
                reasons.push(IneligibleReason::NoMetadataForManifest);
            }
            if !index.init_range.is_some_and(|r| r.is_valid()) {
                reasons.push(IneligibleReason::InvalidInitRange);
            }
            if !index.index_range.is_some_and(|r| r.is_valid()) {
                reasons.push(IneligibleReason::InvalidIndexRange);
            }
        }
    }

    let has_stream_duration = stream_duration_secs.is_some_and(|d| d > 0);
    let has_track_duration = index
        .and_then(|i| i.approx_duration_ms)
        .is_some_and(|ms| ms > 0);
    if !has_stream_duration && !has_track_duration {
        reasons.push(IneligibleReason::NoDuration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_types::{ByteRange, Resolution};

    fn index(init: (i64, i64), idx: (i64, i64)) -> SegmentIndex {
        SegmentIndex {
            itag: 137,
            init_range: Some(ByteRange::new(init.0, init.1)),
            index_range: Some(ByteRange::new(idx.0, idx.1)),
            approx_duration_ms: Some(212_040),
            content_length: None,
        }
    }

    fn eligible_video() -> VideoTrack {
        VideoTrack {
            url: "https://cdn/v".into(),
            mime_type: "video/mp4".into(),
            resolution: Some(Resolution::new(1920, 1080)),
            is_video_only: true,
            delivery: DeliveryMethod::ProgressiveHttp,
            segment_index: Some(index((0, 740), (741, 1256))),
            ..Default::default()
        }
    }

    #[test]
    fn eligible_video_only_progressive() {
        let result = check_video_eligibility(&eligible_video(), Some(212));
        assert!(result.eligible);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn single_byte_init_range_is_valid() {
        let mut track = eligible_video();
        track.segment_index = Some(index((0, 0), (1, 500)));
        assert!(check_video_eligibility(&track, Some(10)).eligible);
    }

    #[test]
    fn each_failure_is_reported() {
        let mut track = eligible_video();
        track.delivery = DeliveryMethod::Hls;
        track.is_video_only = false;
        track.segment_index = Some(SegmentIndex {
            itag: 137,
            init_range: Some(ByteRange::new(741, 740)),
            index_range: Some(ByteRange::new(-1, 100)),
            approx_duration_ms: None,
            content_length: None,
        });

        let result = check_video_eligibility(&track, None);
        assert!(!result.eligible);
        assert_eq!(
            result.reasons,
            vec![
                IneligibleReason::NotProgressiveDelivery,
                IneligibleReason::MuxedStream,
                IneligibleReason::InvalidInitRange,
                IneligibleReason::InvalidIndexRange,
                IneligibleReason::NoDuration,
            ]
        );
        assert_eq!(
            result.codes(),
            "NOT_PROGRESSIVE_DELIVERY,MUXED_STREAM,INVALID_INIT_RANGE,INVALID_INDEX_RANGE,NO_DURATION"
        );
    }

    #[test]
    fn missing_metadata_reported() {
        let mut track = eligible_video();
        track.segment_index = None;
        let result = check_video_eligibility(&track, Some(100));
        assert!(result.has(IneligibleReason::NoMetadataForManifest));
        assert!(!result.has(IneligibleReason::NoDuration));
    }

    #[test]
    fn track_duration_is_enough() {
        let track = eligible_video();
        assert!(check_video_eligibility(&track, None).eligible);
        assert!(check_video_eligibility(&track, Some(0)).eligible);
    }

    #[test]
    fn audio_skips_video_only_check() {
        let audio = AudioTrack {
            url: "https://cdn/a".into(),
            mime_type: "audio/webm".into(),
            delivery: DeliveryMethod::ProgressiveHttp,
            segment_index: Some(index((0, 265), (266, 600))),
            ..Default::default()
        };
        assert!(check_audio_eligibility(&audio, None).eligible);

        let empty = AudioTrack::default();
        let result = check_audio_eligibility(&empty, None);
        assert_eq!(result.reasons[0], IneligibleReason::NoContent);
        assert!(!result.has(IneligibleReason::MuxedStream));
    }
}

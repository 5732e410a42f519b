//! Synthetic DASH manifest generation.
//!
//! Wraps progressive byte-range streams in an on-demand MPD so players can
//! seek using the stream's own segment index. Failures carry a reason code
//! only; stream URLs are signed and never leave this module except inside
//! the generated document.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use media_types::{AudioTrack, ResolvedStreams, SegmentIndex, VideoTrack};

use crate::eligibility::{IneligibleReason, check_audio_eligibility, check_video_eligibility};

const DEFAULT_VIDEO_CODEC: &str = "avc1.64001f";
const DEFAULT_AUDIO_CODEC: &str = "mp4a.40.2";
const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_VIDEO_BANDWIDTH: u64 = 1_000_000;
const DEFAULT_AUDIO_BANDWIDTH: u64 = 128_000;
const DEFAULT_FPS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManifestFailureCode {
    EmptyMpd,
    NoDuration,
    Ineligible,
    ContainerMismatch,
}

impl ManifestFailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyMpd => "EMPTY_MPD",
            Self::NoDuration => "NO_DURATION",
            Self::Ineligible => "INELIGIBLE",
            Self::ContainerMismatch => "CONTAINER_MISMATCH",
        }
    }
}

impl fmt::Display for ManifestFailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("synthetic manifest unavailable: {code}")]
pub struct ManifestError {
    pub code: ManifestFailureCode,
    /// Eligibility reasons when `code` is `Ineligible`.
    pub reasons: Vec<IneligibleReason>,
}

impl ManifestError {
    fn new(code: ManifestFailureCode) -> Self {
        Self {
            code,
            reasons: Vec::new(),
        }
    }

    fn ineligible(reasons: Vec<IneligibleReason>) -> Self {
        Self {
            code: ManifestFailureCode::Ineligible,
            reasons,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video {
        width: Option<u32>,
        height: Option<u32>,
        fps: Option<u32>,
    },
    Audio,
}

/// What the manifest needs to know about one track, apart from its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    pub kind: TrackKind,
    pub mime_type: String,
    pub codec: Option<String>,
    pub bitrate: Option<u64>,
    pub segment_index: Option<SegmentIndex>,
}

impl TrackMetadata {
    pub fn from_video(track: &VideoTrack) -> Self {
        Self {
            kind: TrackKind::Video {
                width: track.resolution.map(|r| r.width),
                height: track.resolution.map(|r| r.height),
                fps: track.fps,
            },
            mime_type: track.mime_type.clone(),
            codec: track.codec.clone(),
            bitrate: track.bitrate,
            segment_index: track.segment_index.clone(),
        }
    }

    pub fn from_audio(track: &AudioTrack) -> Self {
        Self {
            kind: TrackKind::Audio,
            mime_type: track.mime_type.clone(),
            codec: track.codec.clone(),
            bitrate: track.bitrate,
            segment_index: track.segment_index.clone(),
        }
    }

    fn container(&self) -> &str {
        self.mime_type
            .split_once('/')
            .map(|(_, sub)| sub.split(';').next().unwrap_or(sub).trim())
            .unwrap_or_default()
    }

    fn is_opus(&self) -> bool {
        self.codec
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case("opus"))
    }

    fn itag(&self) -> u32 {
        self.segment_index.as_ref().map(|i| i.itag).unwrap_or_default()
    }
}

/// A track URL paired with its metadata.
#[derive(Debug, Clone, Copy)]
pub struct Representation<'a> {
    pub url: &'a str,
    pub track: &'a TrackMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticManifest {
    pub mpd: String,
    pub duration_secs: u64,
    pub representation_count: usize,
}

/// Build a single-representation manifest for `stream_url`.
///
/// `duration_fallback_secs` wins when positive; otherwise the track's own
/// approximate duration is rounded up to whole seconds.
pub fn try_generate_manifest(
    stream_url: &str,
    track: &TrackMetadata,
    duration_fallback_secs: u64,
) -> Result<SyntheticManifest, ManifestError> {
    let result = single_manifest(stream_url, track, duration_fallback_secs);
    if let Err(e) = &result {
        debug!(code = %e.code, itag = track.itag(), "Synthetic manifest generation failed");
    }
    result
}

fn single_manifest(
    stream_url: &str,
    track: &TrackMetadata,
    duration_fallback_secs: u64,
) -> Result<SyntheticManifest, ManifestError> {
    let approx_ms = track.segment_index.as_ref().and_then(|i| i.approx_duration_ms);
    let duration_secs = resolve_duration(duration_fallback_secs, approx_ms)
        .ok_or(ManifestError::new(ManifestFailureCode::NoDuration))?;
    let rep = Representation {
        url: stream_url,
        track,
    };
    let mpd = match track.kind {
        TrackKind::Video { .. } => generate_multi_representation(&[rep], &[], duration_secs)?,
        TrackKind::Audio => generate_multi_representation(&[], &[rep], duration_secs)?,
    };
    Ok(SyntheticManifest {
        mpd,
        duration_secs,
        representation_count: 1,
    })
}

/// Build a manifest from every eligible progressive track of `streams`.
///
/// Video tracks must share the container of the best eligible video track;
/// audio tracks likewise.
pub fn generate_for_streams(streams: &ResolvedStreams) -> Result<SyntheticManifest, ManifestError> {
    let eligible_video: Vec<(&VideoTrack, TrackMetadata)> = streams
        .video_tracks
        .iter()
        .filter(|t| check_video_eligibility(t, streams.duration_secs).eligible)
        .map(|t| (t, TrackMetadata::from_video(t)))
        .collect();
    let eligible_audio: Vec<(&AudioTrack, TrackMetadata)> = streams
        .audio_tracks
        .iter()
        .filter(|t| check_audio_eligibility(t, streams.duration_secs).eligible)
        .map(|t| (t, TrackMetadata::from_audio(t)))
        .collect();

    if eligible_video.is_empty() {
        let reasons = streams
            .best_video()
            .map(|t| check_video_eligibility(t, streams.duration_secs).reasons)
            .unwrap_or_else(|| vec![IneligibleReason::NoContent]);
        debug!(
            stream_id = %streams.stream_id,
            reasons = ?reasons,
            "No video track eligible for a synthetic manifest"
        );
        return Err(ManifestError::ineligible(reasons));
    }

    let video_container = eligible_video[0].1.container().to_string();
    let video: Vec<Representation<'_>> = eligible_video
        .iter()
        .filter(|(_, meta)| meta.container() == video_container)
        .map(|(t, meta)| Representation {
            url: &t.url,
            track: meta,
        })
        .collect();

    let audio_container = eligible_audio
        .first()
        .map(|(_, meta)| meta.container().to_string());
    let audio: Vec<Representation<'_>> = eligible_audio
        .iter()
        .filter(|(_, meta)| Some(meta.container()) == audio_container.as_deref())
        .map(|(t, meta)| Representation {
            url: &t.url,
            track: meta,
        })
        .collect();

    let approx_ms = video
        .iter()
        .chain(audio.iter())
        .filter_map(|r| r.track.segment_index.as_ref()?.approx_duration_ms)
        .max();
    let duration_secs = resolve_duration(streams.duration_secs.unwrap_or(0), approx_ms)
        .ok_or(ManifestError::new(ManifestFailureCode::NoDuration))?;

    let mpd = generate_multi_representation(&video, &audio, duration_secs)?;
    Ok(SyntheticManifest {
        mpd,
        duration_secs,
        representation_count: video.len() + audio.len(),
    })
}

/// Render an on-demand MPD with one AdaptationSet per mime type.
pub fn generate_multi_representation(
    video: &[Representation<'_>],
    audio: &[Representation<'_>],
    duration_secs: u64,
) -> Result<String, ManifestError> {
    if duration_secs == 0 {
        return Err(ManifestError::new(ManifestFailureCode::NoDuration));
    }
    if video.is_empty() && audio.is_empty() {
        return Err(ManifestError::new(ManifestFailureCode::EmptyMpd));
    }
    if !same_container(video) || !same_container(audio) {
        return Err(ManifestError::new(ManifestFailureCode::ContainerMismatch));
    }
    for rep in video.iter().chain(audio.iter()) {
        let reasons = range_problems(rep.track);
        if !reasons.is_empty() {
            return Err(ManifestError::ineligible(reasons));
        }
    }

    let container = video
        .first()
        .or(audio.first())
        .map(|r| r.track.container())
        .unwrap_or_default();
    let profile = if container == "webm" {
        "urn:mpeg:dash:profile:webm-on-demand:2012"
    } else {
        "urn:mpeg:dash:profile:isoff-on-demand:2011"
    };

    let mut mpd = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    mpd.push_str(&format!(
        "<MPD xmlns=\"urn:mpeg:dash:schema:mpd:2011\" profiles=\"{profile}\" type=\"static\" \
         minBufferTime=\"PT1.5S\" mediaPresentationDuration=\"PT{duration_secs}S\">\n"
    ));
    mpd.push_str("  <Period>\n");
    for set in group_by_mime(video).into_iter().chain(group_by_mime(audio)) {
        write_adaptation_set(&mut mpd, &set);
    }
    mpd.push_str("  </Period>\n");
    mpd.push_str("</MPD>\n");

    if !mpd.contains("<Representation") {
        return Err(ManifestError::new(ManifestFailureCode::EmptyMpd));
    }
    Ok(mpd)
}

fn write_adaptation_set(mpd: &mut String, reps: &[Representation<'_>]) {
    let Some(first) = reps.first() else {
        return;
    };
    mpd.push_str(&format!(
        "    <AdaptationSet mimeType=\"{}\" segmentAlignment=\"true\" subsegmentAlignment=\"true\" subsegmentStartsWithSAP=\"1\">\n",
        escape_xml(mime_essence(&first.track.mime_type))
    ));

    for rep in reps {
        let track = rep.track;
        let itag = track.itag();
        match track.kind {
            TrackKind::Video { width, height, fps } => {
                mpd.push_str(&format!(
                    "      <Representation id=\"video_{itag}\" bandwidth=\"{}\" codecs=\"{}\" width=\"{}\" height=\"{}\" frameRate=\"{}\">\n",
                    track.bitrate.unwrap_or(DEFAULT_VIDEO_BANDWIDTH),
                    escape_xml(track.codec.as_deref().unwrap_or(DEFAULT_VIDEO_CODEC)),
                    width.unwrap_or(DEFAULT_WIDTH),
                    height.unwrap_or(DEFAULT_HEIGHT),
                    fps.unwrap_or(DEFAULT_FPS),
                ));
            }
            TrackKind::Audio => {
                let sampling_rate = if track.is_opus() { 48_000 } else { 44_100 };
                mpd.push_str(&format!(
                    "      <Representation id=\"audio_{itag}\" bandwidth=\"{}\" codecs=\"{}\" audioSamplingRate=\"{sampling_rate}\">\n",
                    track.bitrate.unwrap_or(DEFAULT_AUDIO_BANDWIDTH),
                    escape_xml(track.codec.as_deref().unwrap_or(DEFAULT_AUDIO_CODEC)),
                ));
            }
        }

        // Ranges were validated by the caller.
        if let Some(index) = &track.segment_index
            && let (Some(init), Some(idx)) = (index.init_range, index.index_range)
        {
            mpd.push_str(&format!(
                "        <BaseURL>{}</BaseURL>\n",
                escape_xml(rep.url)
            ));
            mpd.push_str(&format!(
                "        <SegmentBase indexRange=\"{idx}\">\n          <Initialization range=\"{init}\"/>\n        </SegmentBase>\n"
            ));
        }
        mpd.push_str("      </Representation>\n");
    }
    mpd.push_str("    </AdaptationSet>\n");
}

fn range_problems(track: &TrackMetadata) -> Vec<IneligibleReason> {
    let Some(index) = &track.segment_index else {
        return vec![IneligibleReason::NoMetadataForManifest];
    };
    let mut reasons = Vec::new();
    if !index.init_range.is_some_and(|r| r.is_valid()) {
        reasons.push(IneligibleReason::InvalidInitRange);
    }
    if !index.index_range.is_some_and(|r| r.is_valid()) {
        reasons.push(IneligibleReason::InvalidIndexRange);
    }
    reasons
}

fn same_container(reps: &[Representation<'_>]) -> bool {
    reps.windows(2)
        .all(|w| w[0].track.container() == w[1].track.container())
}

fn group_by_mime<'a>(reps: &[Representation<'a>]) -> Vec<Vec<Representation<'a>>> {
    let mut groups: Vec<Vec<Representation<'a>>> = Vec::new();
    for rep in reps {
        let mime = mime_essence(&rep.track.mime_type);
        match groups
            .iter_mut()
            .find(|g| mime_essence(&g[0].track.mime_type) == mime)
        {
            Some(group) => group.push(*rep),
            None => groups.push(vec![*rep]),
        }
    }
    groups
}

fn mime_essence(mime: &str) -> &str {
    mime.split(';').next().unwrap_or(mime).trim()
}

fn resolve_duration(fallback_secs: u64, approx_ms: Option<u64>) -> Option<u64> {
    if fallback_secs > 0 {
        return Some(fallback_secs);
    }
    approx_ms.filter(|ms| *ms > 0).map(|ms| ms.div_ceil(1000))
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use media_types::{ByteRange, DeliveryMethod, Resolution};

    fn index(itag: u32, init: (i64, i64), idx: (i64, i64), approx_ms: Option<u64>) -> SegmentIndex {
        SegmentIndex {
            itag,
            init_range: Some(ByteRange::new(init.0, init.1)),
            index_range: Some(ByteRange::new(idx.0, idx.1)),
            approx_duration_ms: approx_ms,
            content_length: None,
        }
    }

    fn video(itag: u32, mime: &str, height: u32) -> VideoTrack {
        VideoTrack {
            url: format!("https://cdn/v?itag={itag}&sig=a&b"),
            mime_type: mime.into(),
            resolution: Some(Resolution::new(height * 16 / 9, height)),
            bitrate: Some(u64::from(height) * 1000),
            codec: Some("avc1.640028".into()),
            fps: Some(30),
            is_video_only: true,
            delivery: DeliveryMethod::ProgressiveHttp,
            segment_index: Some(index(itag, (0, 740), (741, 1256), Some(212_040))),
            ..Default::default()
        }
    }

    fn audio(itag: u32, mime: &str, codec: &str) -> AudioTrack {
        AudioTrack {
            url: format!("https://cdn/a?itag={itag}"),
            mime_type: mime.into(),
            bitrate: Some(160_000),
            codec: Some(codec.into()),
            delivery: DeliveryMethod::ProgressiveHttp,
            segment_index: Some(index(itag, (0, 265), (266, 600), Some(212_061))),
        }
    }

    #[test]
    fn single_video_manifest() {
        let meta = TrackMetadata::from_video(&video(137, "video/mp4", 1080));
        let manifest = try_generate_manifest("https://cdn/v?a=1&b=2", &meta, 0).unwrap();

        assert_eq!(manifest.duration_secs, 213);
        let mpd = &manifest.mpd;
        assert!(mpd.contains("profiles=\"urn:mpeg:dash:profile:isoff-on-demand:2011\""));
        assert!(mpd.contains("type=\"static\""));
        assert!(mpd.contains("minBufferTime=\"PT1.5S\""));
        assert!(mpd.contains("mediaPresentationDuration=\"PT213S\""));
        assert!(mpd.contains("<AdaptationSet mimeType=\"video/mp4\""));
        assert!(mpd.contains("id=\"video_137\""));
        assert!(mpd.contains("width=\"1920\" height=\"1080\" frameRate=\"30\""));
        assert!(mpd.contains("<BaseURL>https://cdn/v?a=1&amp;b=2</BaseURL>"));
        assert!(mpd.contains("<SegmentBase indexRange=\"741-1256\">"));
        assert!(mpd.contains("<Initialization range=\"0-740\"/>"));
    }

    #[test]
    fn explicit_fallback_duration_wins() {
        let meta = TrackMetadata::from_video(&video(137, "video/mp4", 1080));
        let manifest = try_generate_manifest("https://cdn/v", &meta, 300).unwrap();
        assert_eq!(manifest.duration_secs, 300);
    }

    #[test]
    fn missing_duration_fails_with_code_only() {
        let mut track = video(137, "video/mp4", 1080);
        track.segment_index = Some(index(137, (0, 1), (2, 3), None));
        let meta = TrackMetadata::from_video(&track);
        let err = try_generate_manifest("https://cdn/secret-token", &meta, 0).unwrap_err();
        assert_eq!(err.code, ManifestFailureCode::NoDuration);
        assert!(!err.to_string().contains("secret-token"));
    }

    #[test]
    fn invalid_ranges_fail() {
        let mut track = video(137, "video/mp4", 1080);
        track.segment_index = Some(index(137, (10, 5), (2, 3), Some(1000)));
        let meta = TrackMetadata::from_video(&track);
        let err = try_generate_manifest("https://cdn/v", &meta, 0).unwrap_err();
        assert_eq!(err.code, ManifestFailureCode::Ineligible);
        assert_eq!(err.reasons, vec![IneligibleReason::InvalidInitRange]);
    }

    #[test]
    fn audio_defaults_and_sampling_rate() {
        let mut opus = TrackMetadata::from_audio(&audio(251, "audio/webm", "opus"));
        let mpd = try_generate_manifest("https://cdn/a", &opus, 10).unwrap().mpd;
        assert!(mpd.contains("webm-on-demand:2012"));
        assert!(mpd.contains("id=\"audio_251\""));
        assert!(mpd.contains("audioSamplingRate=\"48000\""));

        opus.codec = None;
        opus.bitrate = None;
        opus.mime_type = "audio/mp4".into();
        let mpd = try_generate_manifest("https://cdn/a", &opus, 10).unwrap().mpd;
        assert!(mpd.contains("codecs=\"mp4a.40.2\""));
        assert!(mpd.contains("bandwidth=\"128000\""));
        assert!(mpd.contains("audioSamplingRate=\"44100\""));
    }

    #[test]
    fn mixed_video_containers_rejected() {
        let a = TrackMetadata::from_video(&video(137, "video/mp4", 1080));
        let b = TrackMetadata::from_video(&video(248, "video/webm", 1080));
        let reps = [
            Representation { url: "u1", track: &a },
            Representation { url: "u2", track: &b },
        ];
        let err = generate_multi_representation(&reps, &[], 10).unwrap_err();
        assert_eq!(err.code, ManifestFailureCode::ContainerMismatch);
    }

    #[test]
    fn empty_input_is_empty_mpd() {
        let err = generate_multi_representation(&[], &[], 10).unwrap_err();
        assert_eq!(err.code, ManifestFailureCode::EmptyMpd);
    }

    #[test]
    fn streams_manifest_uses_all_compatible_tracks() {
        let mut muxed = video(18, "video/mp4", 360);
        muxed.is_video_only = false;
        let streams = ResolvedStreams {
            stream_id: "dQw4w9WgXcQ".into(),
            video_tracks: vec![
                video(137, "video/mp4", 1080),
                video(248, "video/webm", 1080),
                video(136, "video/mp4", 720),
                muxed,
            ],
            audio_tracks: vec![audio(140, "audio/mp4", "mp4a.40.2"), audio(251, "audio/webm", "opus")],
            duration_secs: Some(212),
            generated_at: Utc::now(),
            timebase_version: 1,
        };

        let manifest = generate_for_streams(&streams).unwrap();
        assert_eq!(manifest.representation_count, 3);
        assert_eq!(manifest.duration_secs, 212);
        assert!(manifest.mpd.contains("video_137"));
        assert!(manifest.mpd.contains("video_136"));
        assert!(!manifest.mpd.contains("video_248"));
        assert!(!manifest.mpd.contains("video_18"));
        assert!(manifest.mpd.contains("audio_140"));
        assert!(!manifest.mpd.contains("audio_251"));
        assert_eq!(manifest.mpd.matches("<AdaptationSet").count(), 2);
    }

    #[test]
    fn streams_without_eligible_video_report_reasons() {
        let mut muxed = video(18, "video/mp4", 360);
        muxed.is_video_only = false;
        let streams = ResolvedStreams {
            stream_id: "dQw4w9WgXcQ".into(),
            video_tracks: vec![muxed],
            audio_tracks: vec![],
            duration_secs: Some(212),
            generated_at: Utc::now(),
            timebase_version: 1,
        };
        let err = generate_for_streams(&streams).unwrap_err();
        assert_eq!(err.code, ManifestFailureCode::Ineligible);
        assert_eq!(err.reasons, vec![IneligibleReason::MuxedStream]);
    }
}

use std::io::Write;

#[cfg(feature = "colored-output")]
use colored::*;
use serde_json::{Value, json};

use media_types::{PlaylistItem, ResolvedStreams};
use playlist_continuity::SessionSnapshot;
use stream_resolver::MetricsSnapshot;
use synthetic_dash::{EligibilityResult, SyntheticManifest};

use crate::cli::OutputFormat;
use crate::error::Result;

pub struct OutputManager {
    format: OutputFormat,
}

impl OutputManager {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn streams(&self, streams: &ResolvedStreams) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.json(&streams_json(streams)),
            OutputFormat::Pretty => {
                let mut out = String::new();
                out.push_str(&heading(&format!("Streams for {}", streams.stream_id)));
                out.push('\n');
                if let Some(duration) = streams.duration_secs {
                    out.push_str(&format!("  Duration: {duration}s\n"));
                }
                out.push_str(&format!("  Resolved: {}\n", streams.generated_at.to_rfc3339()));
                out.push_str(&heading("Video"));
                out.push('\n');
                for track in &streams.video_tracks {
                    out.push_str(&format!(
                        "  {:<10} {:<24} {:>8} kbps  {}\n",
                        track.quality_label.as_deref().unwrap_or("?"),
                        track.mime_type,
                        track.bitrate.unwrap_or(0) / 1000,
                        if track.is_video_only { "video-only" } else { "muxed" },
                    ));
                }
                out.push_str(&heading("Audio"));
                out.push('\n');
                for track in &streams.audio_tracks {
                    out.push_str(&format!(
                        "  {:<35} {:>8} kbps\n",
                        track.mime_type,
                        track.bitrate.unwrap_or(0) / 1000,
                    ));
                }
                self.write(&out)
            }
        }
    }

    pub fn manifest(&self, video_id: &str, manifest: &SyntheticManifest) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.json(&json!({
                "status": "ok",
                "video_id": video_id,
                "duration_secs": manifest.duration_secs,
                "representations": manifest.representation_count,
                "mpd": manifest.mpd,
            })),
            OutputFormat::Pretty => self.write(&manifest.mpd),
        }
    }

    /// Per-track eligibility, printed when no manifest could be built.
    pub fn eligibility(&self, tracks: &[(String, EligibilityResult)]) -> Result<()> {
        match self.format {
            OutputFormat::Json => {
                let tracks: Vec<Value> = tracks
                    .iter()
                    .map(|(label, result)| {
                        json!({ "track": label, "eligible": result.eligible, "reasons": result.reasons })
                    })
                    .collect();
                self.json(&json!({ "tracks": tracks }))
            }
            OutputFormat::Pretty => {
                let mut out = heading("Manifest eligibility");
                out.push('\n');
                for (label, result) in tracks {
                    let verdict = if result.eligible {
                        "eligible".to_string()
                    } else {
                        result.codes()
                    };
                    out.push_str(&format!("  {label:<24} {verdict}\n"));
                }
                self.write(&out)
            }
        }
    }

    pub fn playing(&self, step: usize, item: &PlaylistItem) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.json_line(&json!({
                "step": step,
                "position": item.position,
                "video_id": item.video_id,
                "title": item.title,
            })),
            OutputFormat::Pretty => self.write(&format!(
                "{:>3}. [{}] {} {}\n",
                step, item.position, item.video_id, item.title
            )),
        }
    }

    pub fn session(&self, snapshot: &SessionSnapshot) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.json_line(&serde_json::to_value(snapshot)?),
            OutputFormat::Pretty => self.write(&format!(
                "{}\n  State: {:?}\n  Queued: {}\n  More pages: {}\n  Paging failed: {}\n",
                heading("Session"),
                snapshot.state,
                snapshot.queue_len,
                snapshot.has_more_pages,
                snapshot.paging_failed,
            )),
        }
    }

    pub fn metrics(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        if self.format == OutputFormat::Json {
            return self.json_line(&json!({ "metrics": snapshot }));
        }
        Ok(())
    }

    pub fn text(&self, text: &str) -> Result<()> {
        self.write(text)
    }

    fn json(&self, value: &Value) -> Result<()> {
        self.write(&format!("{}\n", serde_json::to_string_pretty(value)?))
    }

    fn json_line(&self, value: &Value) -> Result<()> {
        self.write(&format!("{}\n", serde_json::to_string(value)?))
    }

    fn write(&self, s: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(s.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

fn streams_json(streams: &ResolvedStreams) -> Value {
    let video: Vec<Value> = streams
        .video_tracks
        .iter()
        .map(|t| {
            json!({
                "quality": t.quality_label,
                "mime_type": t.mime_type,
                "bitrate": t.bitrate,
                "fps": t.fps,
                "video_only": t.is_video_only,
                "itag": t.segment_index.as_ref().map(|i| i.itag),
            })
        })
        .collect();
    let audio: Vec<Value> = streams
        .audio_tracks
        .iter()
        .map(|t| {
            json!({
                "mime_type": t.mime_type,
                "bitrate": t.bitrate,
                "codec": t.codec,
                "itag": t.segment_index.as_ref().map(|i| i.itag),
            })
        })
        .collect();
    json!({
        "status": "ok",
        "video_id": streams.stream_id,
        "duration_secs": streams.duration_secs,
        "generated_at": streams.generated_at,
        "video": video,
        "audio": audio,
    })
}

#[cfg(feature = "colored-output")]
fn heading(s: &str) -> String {
    s.green().bold().to_string()
}

#[cfg(not(feature = "colored-output"))]
fn heading(s: &str) -> String {
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_types::{SegmentIndex, VideoTrack};

    fn sample_streams() -> ResolvedStreams {
        ResolvedStreams {
            stream_id: "dQw4w9WgXcQ".into(),
            video_tracks: vec![VideoTrack {
                url: "https://cdn/v?sig=secret".into(),
                mime_type: "video/mp4".into(),
                quality_label: Some("1080p".into()),
                bitrate: Some(4_000_000),
                is_video_only: true,
                segment_index: Some(SegmentIndex {
                    itag: 137,
                    ..Default::default()
                }),
                ..Default::default()
            }],
            audio_tracks: vec![],
            duration_secs: Some(212),
            generated_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            timebase_version: 1,
        }
    }

    #[test]
    fn stream_json_omits_urls() {
        let value = streams_json(&sample_streams());
        assert_eq!(value["video"][0]["itag"], 137);
        assert_eq!(value["video"][0]["quality"], "1080p");
        assert!(!value.to_string().contains("secret"));
    }
}

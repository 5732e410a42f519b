//! Synthetic DASH manifests for progressive streams.
//!
//! Progressive downloads that carry a segment index can be presented to a
//! DASH player as an on-demand MPD, which gives accurate seeking without a
//! server-provided manifest.

pub mod eligibility;
pub mod manifest;
pub mod registry;

pub use eligibility::{
    EligibilityResult, IneligibleReason, check_audio_eligibility, check_video_eligibility,
};
pub use manifest::{
    ManifestError, ManifestFailureCode, Representation, SyntheticManifest, TrackKind,
    TrackMetadata, generate_for_streams, generate_multi_representation, try_generate_manifest,
};
pub use registry::ManifestRegistry;

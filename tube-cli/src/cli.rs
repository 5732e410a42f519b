use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "tube",
    version,
    about = "Resolve streams, synthesize DASH manifests and walk playlists"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Base URL of an Invidious-compatible instance
    #[arg(long, global = true, env = "TUBE_INSTANCE")]
    pub instance: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "TUBE_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve the playable tracks of a video
    Resolve {
        video_id: String,
        /// Skip the cache
        #[arg(long)]
        force: bool,
    },

    /// Print a synthetic DASH manifest for a video
    Manifest { video_id: String },

    /// Play through a playlist, printing each item that starts
    Playlist {
        playlist_id: String,
        /// Video to start from
        #[arg(long)]
        target: Option<String>,
        /// Expected index of the start video
        #[arg(long, default_value_t = 0)]
        index: usize,
        #[arg(long)]
        shuffle: bool,
        /// Number of items to play before stopping
        #[arg(long, default_value_t = 5)]
        steps: usize,
    },

    /// Print the effective configuration
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_playlist_command() {
        let args = Args::try_parse_from([
            "tube", "playlist", "PL123", "--target", "dQw4w9WgXcQ", "--index", "3", "--shuffle",
            "--output", "json",
        ])
        .unwrap();

        assert_eq!(args.output, OutputFormat::Json);
        match args.command {
            Commands::Playlist {
                playlist_id,
                target,
                index,
                shuffle,
                steps,
            } => {
                assert_eq!(playlist_id, "PL123");
                assert_eq!(target.as_deref(), Some("dQw4w9WgXcQ"));
                assert_eq!(index, 3);
                assert!(shuffle);
                assert_eq!(steps, 5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Args::try_parse_from(["tube", "-v", "-q", "config"]).is_err());
    }
}

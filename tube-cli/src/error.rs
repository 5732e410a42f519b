use std::path::PathBuf;

use thiserror::Error;

/// Failures that belong to the CLI itself rather than the engine crates.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    #[error("not a valid video id: {0}")]
    InvalidVideoId(String),
}

pub type Result<T> = anyhow::Result<T>;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use playlist_continuity::ContinuityConfig;
use stream_resolver::EngineConfig;

use crate::error::CliError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the Invidious-compatible backend.
    #[serde(default = "default_instance")]
    pub instance: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub continuity: ContinuityConfig,
}

fn default_instance() -> String {
    "http://localhost:3000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            request_timeout_ms: default_request_timeout_ms(),
            engine: EngineConfig::default(),
            continuity: ContinuityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the user config directory when no path is
    /// given. A missing default file yields the defaults; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, CliError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| CliError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tube-cli").join("config.toml"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn show(&self) -> Result<String, CliError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
instance = "https://invidious.example"

[engine.rate_limiter]
global_max_requests = 20

[continuity]
low_water_mark = 3
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.instance, "https://invidious.example");
        assert_eq!(config.engine.rate_limiter.global_max_requests, 20);
        assert_eq!(config.engine.rate_limiter.per_video_max_requests, 3);
        assert_eq!(config.continuity.low_water_mark, 3);
        assert_eq!(config.continuity.max_consecutive_skips, 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/tube.toml"))).unwrap_err();
        assert!(matches!(err, CliError::ConfigRead { .. }));
    }

    #[test]
    fn invalid_toml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "instance = [").unwrap();
        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, CliError::ConfigParse { .. }));
    }

    #[test]
    fn shown_config_parses_back() {
        let config = AppConfig::default();
        let shown = config.show().unwrap();
        let parsed: AppConfig = toml::from_str(&shown).unwrap();
        assert_eq!(parsed, config);
    }
}

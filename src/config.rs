//! Configuration file handling for channel-rotator.
//!
//! Loads configuration from `~/.config/channel-rotator/config.toml` or a
//! custom path.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration file structure for channel-rotator.
/// Loaded from ~/.config/channel-rotator/config.toml (or custom path via --config).
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct CaptureConfig {
    pub frontend: Option<PathBuf>,
    pub demux: Option<PathBuf>,
    pub dvr: Option<PathBuf>,
    pub buffer_size: Option<usize>,
    pub settle_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RotationConfig {
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StorageConfig {
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RemoteConfig {
    pub name: Option<String>,
    pub raw_path: Option<String>,
    pub audio_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AudioConfig {
    pub bitrate: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MonitorConfig {
    pub enabled: Option<bool>,
    pub player: Option<String>,
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                source: e,
            })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from an explicitly requested path, which must exist.
    pub fn load_from_explicit(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        Config::load(Some(&path))
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    NotFound {
        path: PathBuf,
    },
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound { path } => {
                write!(f, "Config file '{}' not found", path.display())
            }
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::NotFound { .. } => None,
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("channel-rotator/config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/channel-rotator/config.toml")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/config.toml"))).unwrap();
        assert!(config.rotation.interval_secs.is_none());
        assert!(config.capture.frontend.is_none());
    }

    #[test]
    fn test_full_config_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[capture]
frontend = "/dev/dvb/adapter1/frontend0"
demux = "/dev/dvb/adapter1/demux0"
dvr = "/dev/dvb/adapter1/dvr0"
buffer_size = 8192
settle_ms = 3000

[rotation]
interval_secs = 600

[storage]
workdir = "segments"

[remote]
name = "backup"
raw_path = "ts"
audio_path = "ts/audio"

[audio]
bitrate = "128k"

[monitor]
enabled = false
player = "mpv"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(
            config.capture.frontend,
            Some(PathBuf::from("/dev/dvb/adapter1/frontend0"))
        );
        assert_eq!(config.capture.buffer_size, Some(8192));
        assert_eq!(config.capture.settle_ms, Some(3000));
        assert_eq!(config.rotation.interval_secs, Some(600));
        assert_eq!(config.storage.workdir, Some(PathBuf::from("segments")));
        assert_eq!(config.remote.name.as_deref(), Some("backup"));
        assert_eq!(config.audio.bitrate.as_deref(), Some("128k"));
        assert_eq!(config.monitor.enabled, Some(false));
        assert_eq!(config.monitor.player.as_deref(), Some("mpv"));
    }

    #[test]
    fn test_partial_config_leaves_rest_unset() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[rotation]\ninterval_secs = 60\n").unwrap();
        file.flush().unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.rotation.interval_secs, Some(60));
        assert!(config.remote.name.is_none());
    }

    #[test]
    fn test_invalid_toml_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "this is not toml [").unwrap();
        file.flush().unwrap();

        match Config::load(Some(file.path())) {
            Err(ConfigError::ParseError { .. }) => {}
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let err =
            Config::load_from_explicit(PathBuf::from("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }
}

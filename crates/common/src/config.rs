//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VeneerError, VeneerResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default export settings.
    pub export: ExportDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Which rendering backend an export should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendPreference {
    /// GPU pipeline when available, ffmpeg CLI otherwise.
    #[default]
    Auto,
    /// GPU pipeline only.
    Gpu,
    /// External `ffmpeg` binary only.
    FfmpegCli,
}

impl std::str::FromStr for BackendPreference {
    type Err = VeneerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "gpu" => Ok(Self::Gpu),
            "ffmpeg-cli" | "ffmpeg" | "cli" => Ok(Self::FfmpegCli),
            other => Err(VeneerError::config(format!("unknown backend '{other}'"))),
        }
    }
}

/// Tunables for the export pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Upper bound on the encoder bitrate (bits/s).
    pub max_bitrate: u64,

    /// Bits per output pixel used to derive the bitrate below the cap.
    pub bits_per_pixel: u64,

    /// Seconds between key frames.
    pub key_frame_interval_secs: u32,

    /// How long to wait for a decoded frame to reach the video surface.
    pub frame_wait_timeout_ms: u64,

    /// Poll timeout when asking the decoder for more output.
    pub dequeue_timeout_ms: u64,

    /// Poll timeout for each blocking encoder drain.
    pub drain_timeout_ms: u64,

    /// Consecutive empty blocking drains tolerated before the encoder is
    /// considered stalled.
    pub drain_stall_limit: u32,

    /// Consecutive frame-wait timeouts tolerated before aborting. Zero
    /// tolerates any number.
    pub max_consecutive_frame_timeouts: u32,

    /// Encoder names tried in order; the first one ffmpeg knows is used.
    pub encoders: Vec<String>,

    /// Try hardware decoding before falling back to software.
    pub hardware_decode: bool,

    /// Rendering backend selection.
    pub backend: BackendPreference,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "veneer=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            max_bitrate: 4_000_000,
            bits_per_pixel: 2,
            key_frame_interval_secs: 2,
            frame_wait_timeout_ms: 2000,
            dequeue_timeout_ms: 10,
            drain_timeout_ms: 10,
            drain_stall_limit: 500,
            max_consecutive_frame_timeouts: 5,
            encoders: vec![
                "h264_videotoolbox".to_string(),
                "h264_nvenc".to_string(),
                "h264_qsv".to_string(),
                "libx264".to_string(),
            ],
            hardware_decode: false,
            backend: BackendPreference::Auto,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl ExportDefaults {
    /// Encoder bitrate for an output of the given size.
    pub fn bitrate_for(&self, width: u32, height: u32) -> u64 {
        let pixels = u64::from(width) * u64::from(height);
        (pixels * self.bits_per_pixel).min(self.max_bitrate)
    }

    pub fn validate(&self) -> VeneerResult<()> {
        if self.max_bitrate == 0 || self.bits_per_pixel == 0 {
            return Err(VeneerError::config("bitrate settings must be positive"));
        }
        if self.frame_wait_timeout_ms == 0 {
            return Err(VeneerError::config("frame_wait_timeout_ms must be positive"));
        }
        if self.encoders.is_empty() {
            return Err(VeneerError::config("at least one encoder must be listed"));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path. Missing fields take defaults.
    pub fn load_from(path: &Path) -> VeneerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.export.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> VeneerResult<()> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> VeneerResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("veneer").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate_is_capped() {
        let defaults = ExportDefaults::default();
        assert_eq!(defaults.bitrate_for(640, 360), 460_800);
        assert_eq!(defaults.bitrate_for(1920, 1080), 4_000_000);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"export":{"backend":"ffmpeg-cli"}}"#).unwrap();
        assert_eq!(config.export.backend, BackendPreference::FfmpegCli);
        assert_eq!(config.export.frame_wait_timeout_ms, 2000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.export.encoders = vec!["libx264".to_string()];
        config.logging.json = true;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.export.encoders, vec!["libx264".to_string()]);
        assert!(loaded.logging.json);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"export":{"encoders":[]}}"#).unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, VeneerError::Config { .. }));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("gpu".parse::<BackendPreference>().unwrap(), BackendPreference::Gpu);
        assert_eq!(
            "ffmpeg".parse::<BackendPreference>().unwrap(),
            BackendPreference::FfmpegCli
        );
        assert!("vulkan".parse::<BackendPreference>().is_err());
    }
}

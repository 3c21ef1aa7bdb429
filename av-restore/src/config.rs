//! Application configuration.
//!
//! Stored as TOML. Default location: `<config_dir>/av-restore/config.toml`.
//! Values are layered: built-in defaults, then the file, then environment
//! variables (with `.env` loaded), then command-line flags.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

pub const ENV_FFMPEG: &str = "FFMPEG_PATH";
pub const ENV_FFPROBE: &str = "FFPROBE_PATH";
pub const ENV_SOX: &str = "SOX_PATH";
pub const ENV_REALESRGAN: &str = "REALESRGAN_PATH";
pub const ENV_WORK_ROOT: &str = "AV_RESTORE_WORK_ROOT";

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tools: ToolPaths,
    /// Parent of every per-input work directory.
    pub work_root: PathBuf,
    pub upscale: UpscaleDefaults,
    pub denoise: DenoiseDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            work_root: default_work_root(),
            upscale: UpscaleDefaults::default(),
            denoise: DenoiseDefaults::default(),
        }
    }
}

/// Binaries used for each external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub sox: String,
    pub realesrgan: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            sox: "sox".to_string(),
            realesrgan: "realesrgan-ncnn-vulkan".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleDefaults {
    /// Seconds of source per segment.
    pub segment_length: u64,
    pub model: String,
    pub scale: u32,
    /// Tile size in pixels, 0 lets the upscaler decide.
    pub tile: u32,
    /// Upscaler `load:proc:save` thread counts.
    pub threads: String,
    pub crf: u32,
    pub preset: String,
}

impl Default for UpscaleDefaults {
    fn default() -> Self {
        Self {
            segment_length: 60,
            model: "realesr-animevideov3".to_string(),
            scale: 2,
            tile: 0,
            threads: "1:2:2".to_string(),
            crf: 18,
            preset: "slow".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseDefaults {
    /// Noise reduction amount, `(0, 1]`.
    pub strength: f64,
    /// Peak normalization target in dBFS.
    pub normalize_db: f64,
    /// Start of the noise sample window, seconds.
    pub sample_start: f64,
    /// Length of the noise sample window, seconds.
    pub sample_length: f64,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for DenoiseDefaults {
    fn default() -> Self {
        Self {
            strength: 0.21,
            normalize_db: -1.0,
            sample_start: 0.0,
            sample_length: 1.0,
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
        }
    }
}

fn default_work_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("av-restore")
}

/// `<config_dir>/av-restore/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("av-restore").join("config.toml"))
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::config(format!("invalid TOML: {e}")))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used when present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (Some(p.to_path_buf()), true),
            None => (default_config_path(), false),
        };

        let Some(path) = path else {
            debug!("No config directory on this platform, using defaults");
            return Ok(Self::default());
        };

        if !path.exists() {
            if required {
                return Err(Error::config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&path).map_err(|e| Error::io_path("reading", &path, e))?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_FFMPEG) {
            self.tools.ffmpeg = v;
        }
        if let Some(v) = non_empty(ENV_FFPROBE) {
            self.tools.ffprobe = v;
        }
        if let Some(v) = non_empty(ENV_SOX) {
            self.tools.sox = v;
        }
        if let Some(v) = non_empty(ENV_REALESRGAN) {
            self.tools.realesrgan = v;
        }
        if let Some(v) = non_empty(ENV_WORK_ROOT) {
            self.work_root = PathBuf::from(v);
        }
    }

    /// Apply overrides from the process environment, after loading `.env`.
    pub fn apply_env(&mut self) {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env");
        }
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    pub fn validate(&self) -> Result<()> {
        if self.upscale.segment_length == 0 {
            return Err(Error::config("upscale.segment_length must be greater than 0"));
        }
        if !matches!(self.upscale.scale, 2..=4) {
            return Err(Error::config("upscale.scale must be 2, 3 or 4"));
        }
        let strength = self.denoise.strength;
        if !(strength > 0.0 && strength <= 1.0) {
            return Err(Error::config("denoise.strength must be in (0, 1]"));
        }
        if !(self.denoise.sample_length > 0.0) {
            return Err(Error::config("denoise.sample_length must be greater than 0"));
        }
        if self.denoise.sample_start < 0.0 {
            return Err(Error::config("denoise.sample_start must not be negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tools.ffmpeg, "ffmpeg");
        assert_eq!(config.upscale.segment_length, 60);
        assert!(config.work_root.ends_with("av-restore"));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            work_root = "/srv/restore"

            [tools]
            ffmpeg = "/opt/ffmpeg/bin/ffmpeg"

            [upscale]
            tile = 256
            "#,
        )
        .unwrap();
        assert_eq!(config.work_root, PathBuf::from("/srv/restore"));
        assert_eq!(config.tools.ffmpeg, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.tools.sox, "sox");
        assert_eq!(config.upscale.tile, 256);
        assert_eq!(config.upscale.scale, 2);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = AppConfig::default();
        let env: HashMap<&str, &str> = [
            (ENV_SOX, "/usr/local/bin/sox"),
            (ENV_WORK_ROOT, "/tmp/work"),
            (ENV_FFPROBE, "  "),
        ]
        .into_iter()
        .collect();
        config.apply_env_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.tools.sox, "/usr/local/bin/sox");
        assert_eq!(config.work_root, PathBuf::from("/tmp/work"));
        assert_eq!(config.tools.ffprobe, "ffprobe");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let err = AppConfig::load(Some(&temp.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn load_reads_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[denoise]\nstrength = 0.3\n").unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.denoise.strength, 0.3);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.upscale.scale = 8;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.denoise.strength = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upscale.segment_length = 0;
        assert!(config.validate().is_err());
    }
}

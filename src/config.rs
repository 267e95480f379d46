// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional; a missing file or section falls back to the
// defaults below.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use crate::text::TextAlign;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub pipeline: PipelineConfig,
    pub text: TextConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Vulkan device settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub app_name: String,
    pub validation_layers: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "glyph-pipeline".to_string(),
            validation_layers: true,
        }
    }
}

/// Pipeline and descriptor pool sizing
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_frames_in_flight: u32,
    /// Texts the fonts renderer can draw at once (one descriptor set each).
    pub max_texts: u32,
    pub target_width: u32,
    pub target_height: u32,
    pub clear_color: [f32; 4],
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 2,
            max_texts: 16,
            target_width: 640,
            target_height: 360,
            clear_color: [0.1, 0.2, 0.8, 1.0],
        }
    }
}

/// Text layout settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// `.fnt` metrics file; the built-in ASCII grid is used when unset.
    pub font_file: Option<PathBuf>,
    pub font_size: f32,
    pub max_line_width: f32,
    pub align: TextAlign,
    pub tracking: f32,
    pub sample: String,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            font_file: None,
            font_size: 32.0,
            max_line_width: 12.0,
            align: TextAlign::Left,
            tracking: 0.0,
            sample: "The quick brown fox jumps over the lazy dog".to_string(),
        }
    }
}

/// Compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub font_vertex: PathBuf,
    pub font_fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            font_vertex: PathBuf::from("shaders/font.vert.spv"),
            font_fragment: PathBuf::from("shaders/font.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// env_logger filter used when RUST_LOG is not set, e.g. "info,glyph_pipeline=debug".
    pub log_filter: Option<String>,
    pub log_to_file: bool,
    pub log_file: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_filter: None,
            log_to_file: false,
            log_file: PathBuf::from("glyph_pipeline.log"),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.pipeline.max_frames_in_flight == 0 {
            anyhow::bail!("pipeline.max_frames_in_flight must be at least 1");
        }
        if config.text.max_line_width <= 0.0 {
            anyhow::bail!("text.max_line_width must be positive");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.pipeline.max_frames_in_flight, 2);
        assert_eq!(config.text.align, TextAlign::Left);
        assert!(config.text.font_file.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [text]
            align = "centre"
            max_line_width = 4.5

            [pipeline]
            max_texts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.text.align, TextAlign::Centre);
        assert_eq!(config.text.max_line_width, 4.5);
        assert_eq!(config.text.font_size, 32.0);
        assert_eq!(config.pipeline.max_texts, 3);
        assert_eq!(config.pipeline.max_frames_in_flight, 2);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(Config::parse("[pipeline]\nmax_frames_in_flight = 0").is_err());
        assert!(Config::parse("[text]\nalign = \"justify\"").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load_from_path("does/not/exist.toml").unwrap();
        assert!(config.device.validation_layers);
    }
}

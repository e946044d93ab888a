// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional. A missing file yields defaults; a malformed one
// is reported and also falls back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default config file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Triangle".to_string(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    pub mesh: MeshKind,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
            mesh: MeshKind::Quad,
        }
    }
}

/// Which static vertex set to upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshKind {
    Triangle,
    Quad,
}

/// Pre-compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Where the active configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    Invalid { path: PathBuf, error: String },
}

/// Result of `Config::load`. Loading happens before the logger exists, so
/// everything worth reporting is carried here and logged by the caller.
#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub source: ConfigSource,
    pub adjustments: Vec<String>,
}

impl ConfigLoad {
    /// Report the outcome through `log`; call once the logger is installed
    pub fn log(&self) {
        match &self.source {
            ConfigSource::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigSource::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            ConfigSource::Invalid { path, error } => {
                log::warn!("Failed to load {:?}: {}. Using defaults.", path, error)
            }
        }
        for adjustment in &self.adjustments {
            log::warn!("{}", adjustment);
        }
        log::debug!("Config: {:?}", self.config);
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults on any error
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigLoad {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return ConfigLoad {
                config: Config::default(),
                source: ConfigSource::Missing(path),
                adjustments: Vec::new(),
            };
        }

        match Self::read(&path) {
            Ok((config, adjustments)) => ConfigLoad {
                config,
                source: ConfigSource::File(path),
                adjustments,
            },
            Err(e) => ConfigLoad {
                config: Config::default(),
                source: ConfigSource::Invalid {
                    path,
                    error: format!("{:#}", e),
                },
                adjustments: Vec::new(),
            },
        }
    }

    fn read(path: &Path) -> Result<(Self, Vec<String>)> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Parse a TOML document and normalize out-of-range values
    pub fn from_toml(content: &str) -> Result<Self> {
        Self::parse(content).map(|(config, _)| config)
    }

    fn parse(content: &str) -> Result<(Self, Vec<String>)> {
        let mut config: Config = toml::from_str(content)?;
        let adjustments = config.normalize();
        Ok((config, adjustments))
    }

    fn normalize(&mut self) -> Vec<String> {
        let mut adjustments = Vec::new();

        let frames = self.graphics.max_frames_in_flight;
        let clamped = frames.clamp(1, 3);
        if clamped != frames {
            adjustments.push(format!(
                "max_frames_in_flight = {} is out of range, using {}",
                frames, clamped
            ));
            self.graphics.max_frames_in_flight = clamped;
        }

        adjustments
    }

    /// Preferred present mode as Vulkan enum. The swapchain still falls
    /// back to FIFO when the surface does not offer it.
    pub fn preferred_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Log filter from config; RUST_LOG still wins when set
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug
            .log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.graphics.mesh, MeshKind::Quad);
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml(
            r#"
            [window]
            width = 1024

            [graphics]
            present_mode = "FIFO"
            mesh = "triangle"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.mesh, MeshKind::Triangle);
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(
            config.shaders.vertex,
            PathBuf::from("shaders/triangle.vert.spv")
        );
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let config = Config::from_toml("[graphics]\nmax_frames_in_flight = 0").unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, 1);

        let config = Config::from_toml("[graphics]\nmax_frames_in_flight = 9").unwrap();
        assert_eq!(config.graphics.max_frames_in_flight, 3);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let config = Config::from_toml("[graphics]\npresent_mode = \"vsync\"").unwrap();
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(Config::from_toml("[window\nwidth = ").is_err());
        assert!(Config::from_toml("[graphics]\nmesh = \"cube\"").is_err());
    }

    #[test]
    fn log_level_parses_or_defaults() {
        let config = Config::from_toml("[debug]\nlog_level = \"trace\"").unwrap();
        assert_eq!(config.log_level(), log::LevelFilter::Trace);

        let config = Config::from_toml("[debug]\nlog_level = \"loud\"").unwrap();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let loaded = Config::load("does/not/exist.toml");
        assert_eq!(loaded.config.window.title, "Vulkan Triangle");
        assert_eq!(
            loaded.source,
            ConfigSource::Missing(PathBuf::from("does/not/exist.toml"))
        );
    }

    fn scratch_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "vk-triangle-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn malformed_file_falls_back_with_reason() {
        let path = scratch_file("malformed.toml", "[window
width = ");
        let loaded = Config::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.config.window.width, 800);
        match loaded.source {
            ConfigSource::Invalid { path: reported, error } => {
                assert_eq!(reported, path);
                assert!(error.contains("Failed to parse config file"));
            }
            other => panic!("expected an invalid source, got {:?}", other),
        }
    }

    #[test]
    fn clamping_is_carried_to_the_caller() {
        let path = scratch_file("clamped.toml", "[graphics]\nmax_frames_in_flight = 7");
        let loaded = Config::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.source, ConfigSource::File(path));
        assert_eq!(loaded.config.graphics.max_frames_in_flight, 3);
        assert_eq!(loaded.adjustments.len(), 1);
        assert!(loaded.adjustments[0].contains("max_frames_in_flight = 7"));
    }
}

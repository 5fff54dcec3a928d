//! Configuration structs with defaults and RON persistence.

use std::path::Path;

use keel_lighting::{EnvironmentMode, SSAO_KERNEL_SIZE, SunTuning, WeatherPreset};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level viewer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub render: RenderConfig,
    pub lighting: LightingConfig,
    pub assets: AssetsConfig,
    pub debug: DebugConfig,
}

/// Window configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Window width in logical pixels.
    pub width: u32,
    /// Window height in logical pixels.
    pub height: u32,
    pub title: String,
    /// Enable vsync (PresentMode::Fifo).
    pub vsync: bool,
}

/// Renderer configuration. Sizes are fixed once the renderer is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Square shadow map edge in texels.
    pub shadow_map_resolution: u32,
    /// Specular cubemap face edge in texels.
    pub environment_size: u32,
    /// Irradiance cubemap face edge in texels.
    pub irradiance_size: u32,
    pub exposure: f32,
    pub shadows: bool,
    pub ambient_occlusion: bool,
    pub ssao_kernel_size: usize,
    /// View-space sampling radius.
    pub ssao_radius: f32,
    pub ssao_bias: f32,
    pub ssao_intensity: f32,
    pub reflections: bool,
    pub ssr_max_steps: u32,
    /// Depth range behind a surface that still counts as a hit.
    pub ssr_thickness: f32,
    pub ssr_max_distance: f32,
}

/// Initial lighting selection and the sun model's constants.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LightingConfig {
    pub weather: WeatherPreset,
    pub environment: EnvironmentMode,
    pub sun: SunTuning,
}

/// Where models and textures come from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssetsConfig {
    /// Directory or `http(s)://` base URL that relative sources resolve against.
    pub base: String,
    /// Model loaded at startup.
    pub model: Option<String>,
    /// RON variant catalog.
    pub catalog: Option<String>,
    /// Simultaneous fetches.
    pub preload_concurrency: usize,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log per-pass draw calls once a second.
    pub log_draw_stats: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "Keel".to_string(),
            vsync: true,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            shadow_map_resolution: 2048,
            environment_size: 256,
            irradiance_size: 32,
            exposure: 1.0,
            shadows: true,
            ambient_occlusion: true,
            ssao_kernel_size: 48,
            ssao_radius: 0.5,
            ssao_bias: 0.025,
            ssao_intensity: 1.0,
            reflections: true,
            ssr_max_steps: 48,
            ssr_thickness: 0.15,
            ssr_max_distance: 8.0,
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            base: "assets".to_string(),
            model: None,
            catalog: None,
            preload_concurrency: 3,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_draw_stats: false,
        }
    }
}

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)
    }

    /// Returns `Some(new_config)` if the file on disk differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let contents =
            std::fs::read_to_string(config_dir.join(CONFIG_FILE)).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values that parse but would break target allocation or loading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: u32) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    value: value.to_string(),
                    expected: "greater than zero",
                });
            }
            Ok(())
        }

        positive("window.width", self.window.width)?;
        positive("window.height", self.window.height)?;
        positive("render.shadow_map_resolution", self.render.shadow_map_resolution)?;
        positive("render.environment_size", self.render.environment_size)?;
        positive("render.irradiance_size", self.render.irradiance_size)?;

        let kernel = self.render.ssao_kernel_size;
        if !(1..=SSAO_KERNEL_SIZE).contains(&kernel) {
            return Err(ConfigError::OutOfRange {
                field: "render.ssao_kernel_size",
                value: kernel.to_string(),
                expected: "1 to 48",
            });
        }
        if self.render.exposure.is_nan() || self.render.exposure <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "render.exposure",
                value: self.render.exposure.to_string(),
                expected: "greater than zero",
            });
        }
        if self.assets.preload_concurrency == 0 {
            return Err(ConfigError::OutOfRange {
                field: "assets.preload_concurrency",
                value: "0".to_string(),
                expected: "at least one",
            });
        }
        Ok(())
    }

    /// Default location, `<platform config dir>/keel`.
    pub fn default_dir() -> std::path::PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("keel")
    }
}

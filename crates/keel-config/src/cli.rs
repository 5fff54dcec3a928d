//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use keel_lighting::{EnvironmentMode, WeatherPreset};

use crate::Config;

/// Keel model viewer.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "keel", about = "Watercraft model viewer")]
pub struct CliArgs {
    /// Model file path or URL to open.
    #[arg(long)]
    pub model: Option<String>,

    /// Variant catalog (RON).
    #[arg(long)]
    pub catalog: Option<String>,

    /// Window width.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub width: Option<u32>,

    /// Window height.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub height: Option<u32>,

    /// Weather preset (day, sunset, overcast, night).
    #[arg(long)]
    pub weather: Option<WeatherPreset>,

    /// Environment mode (sky, studio).
    #[arg(long)]
    pub environment: Option<EnvironmentMode>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref model) = args.model {
            self.assets.model = Some(model.clone());
        }
        if let Some(ref catalog) = args.catalog {
            self.assets.catalog = Some(catalog.clone());
        }
        if let Some(w) = args.width {
            self.window.width = w;
        }
        if let Some(h) = args.height {
            self.window.height = h;
        }
        if let Some(weather) = args.weather {
            self.lighting.weather = weather;
        }
        if let Some(environment) = args.environment {
            self.lighting.environment = environment;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs::parse_from([
            "keel",
            "--model",
            "boat.glb",
            "--width",
            "1920",
            "--weather",
            "sunset",
            "--environment",
            "studio",
        ]);
        config.apply_cli_overrides(&args);
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.assets.model.as_deref(), Some("boat.glb"));
        assert_eq!(config.lighting.weather, WeatherPreset::Sunset);
        assert_eq!(config.lighting.environment, EnvironmentMode::Studio);
        // Non-overridden fields retain defaults
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_unknown_preset_is_rejected() {
        assert!(CliArgs::try_parse_from(["keel", "--weather", "hurricane"]).is_err());
    }

    #[test]
    fn test_zero_window_size_is_rejected() {
        assert!(CliArgs::try_parse_from(["keel", "--width", "0"]).is_err());
        assert!(CliArgs::try_parse_from(["keel", "--height", "0"]).is_err());
        assert!(CliArgs::try_parse_from(["keel", "--height", "1"]).is_ok());
    }
}

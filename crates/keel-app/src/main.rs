//! Keel watercraft model viewer.
//!
//! Run with: `cargo run -p keel-app -- --model boat.glb`

use clap::Parser;
use keel_config::{CliArgs, Config};
use tracing::info;

fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(Config::default_dir);
    let (mut config, load_error) = match Config::load_or_create(&config_dir) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    keel_log::init_logging(Some(log_dir.as_path()), cfg!(debug_assertions), Some(&config));

    if let Some(e) = load_error {
        tracing::warn!("Using default config, {} unusable: {e}", config_dir.display());
    }
    info!("Keel viewer");
    info!(
        "Window: {}x{} | Weather: {} | Environment: {}",
        config.window.width,
        config.window.height,
        config.lighting.weather.name(),
        config.lighting.environment.name()
    );
    match &config.assets.model {
        Some(model) => info!("Model: {model} (base {})", config.assets.base),
        None => info!("No model given, starting with an empty scene"),
    }

    keel_app::run(config);
}

//! Viewer configuration.
//!
//! Settings persist to disk as `config.ron` and every section falls back to
//! its defaults when missing. Command-line flags override the file.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{AssetsConfig, Config, DebugConfig, LightingConfig, RenderConfig, WindowConfig};
pub use error::ConfigError;

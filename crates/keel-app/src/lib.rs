//! Keel viewer application.
//!
//! Opens a window, loads the configured model and catalog, and drives the
//! frame orchestrator from winit's event loop.

pub mod controls;
pub mod session;
pub mod settings;
pub mod viewer;

pub use viewer::{Viewer, run};

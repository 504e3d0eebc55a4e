// dash-resizer - Resize Tableau dashboards to a new canvas size
//
// This is the library crate containing the resizing pipeline and its data structures.
// The binary crate (main.rs) provides the command-line entry point.

pub mod config;
pub mod logging;
pub mod models;
pub mod services;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use models::{ResizeRequest, ResizerConfig, ResizerSettings};
pub use services::{ResizeError, ResizeReport, ResizeService};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

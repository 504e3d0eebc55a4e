//! Data models for the dashboard resizer.
//!
//! - [`ResizerConfig`]: Output locations and archive handling settings loaded from `Resizer Config.yaml`
//! - [`ResizeRequest`]: One validated resize job (workbook, dashboard, target size)

pub mod config;
pub mod request;

pub use config::{ResizerConfig, ResizerSettings};
pub use request::ResizeRequest;

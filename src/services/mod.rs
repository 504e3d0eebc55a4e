//! Services module - Pure business logic for workbook resizing.
//!
//! Nothing in here knows about the CLI, so every stage can be driven and
//! tested on its own.
//!
//! # Components
//!
//! - [`ResizeService`]: Runs the whole pipeline for one [`ResizeRequest`](crate::models::ResizeRequest):
//!   - Opening a flat `.twb` or extracting a packaged `.twbx` into a [`Workspace`]
//!   - Rescaling one dashboard's zones with [`rescale_dashboard`]
//!   - Writing `<stem>_resized_<timestamp><ext>` next to the configured output directory
//!
//! - [`fixed_point`]: Exact decimal parsing and ROUND_HALF_UP rational arithmetic
//! - [`document`]: Owned XML tree that writes untouched markup back byte-for-byte
//! - [`reconciler`]: Repairs asset file names mangled by legacy zip name encodings
//! - [`container`]: Archive extraction, document lookup and repackaging
//! - [`workspace`]: Per-run scratch directories removed on drop
//!
//! # Usage Example
//!
//! ```ignore
//! use dash_resizer::models::{ResizeRequest, ResizerSettings};
//! use dash_resizer::services::ResizeService;
//!
//! let service = ResizeService::new(ResizerSettings::default())?;
//! let request = ResizeRequest::new("Sales.twbx", "Overview", "1920", "1080")?;
//! let report = service.resize(&request)?;
//! println!("{}", report.summary());
//! ```

pub mod container;
pub mod document;
pub mod fixed_point;
pub mod reconciler;
pub mod rescaler;
pub mod resize;
pub mod workspace;

pub use container::{Workbook, WorkbookKind};
pub use document::{Document, DocumentError};
pub use fixed_point::{BASE_SCALE, Decimal};
pub use reconciler::Rename;
pub use rescaler::{RescaleOutcome, rescale_coordinate, rescale_dashboard};
pub use resize::{ResizeError, ResizeReport, ResizeService};
pub use workspace::Workspace;

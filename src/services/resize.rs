use super::container::{ExtractOptions, Workbook, output_file_name, read_document_text};
use super::document::{Document, DocumentError};
use super::fixed_point::Decimal;
use super::reconciler::Rename;
use super::rescaler::{DASHBOARD_TAG, rescale_dashboard};
use super::workspace::Workspace;
use crate::models::{ResizeRequest, ResizerSettings};
use camino::{Utf8Path, Utf8PathBuf};
use encoding_rs::Encoding;
use std::fs;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that can occur while resizing a workbook
#[derive(Error, Debug)]
pub enum ResizeError {
    #[error("Workbook {0} not found")]
    NotFound(Utf8PathBuf),

    #[error("Workbook {path} is not a readable archive: {reason}")]
    InvalidContainer { path: Utf8PathBuf, reason: String },

    #[error("No .twb document found inside {0}")]
    MissingDocument(Utf8PathBuf),

    #[error("Invalid dimension {value:?}: {reason}")]
    InvalidDimension { value: String, reason: String },

    #[error("Dashboard {0} not found")]
    ElementNotFound(String),

    #[error("Malformed workbook document: {0}")]
    MalformedDocument(#[from] DocumentError),

    #[error("Unknown legacy encoding: {0}")]
    UnknownEncoding(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write archive {path}: {source}")]
    ArchiveWrite {
        path: Utf8PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

impl ResizeError {
    /// Adapter for `map_err` that attaches `path` to an I/O error.
    pub(crate) fn io(path: impl AsRef<Utf8Path>) -> impl FnOnce(io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn invalid_container(path: &Utf8Path, err: impl std::fmt::Display) -> Self {
        Self::InvalidContainer {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }

    /// Reading archive data fails with `InvalidData` on corrupt entries.
    pub(crate) fn read_failure(path: &Utf8Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::InvalidData {
            Self::invalid_container(path, err)
        } else {
            Self::io(path)(err)
        }
    }
}

/// Result of a completed resize run
#[derive(Debug, Clone)]
pub struct ResizeReport {
    pub output_path: Utf8PathBuf,
    pub dashboard_found: bool,
    pub old_size: Option<(Decimal, Decimal)>,
    pub zones_rescaled: usize,
    pub asset_renames: Vec<Rename>,
    pub duration: Duration,
}

impl ResizeReport {
    /// Get a summary string of what was changed
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        match (self.dashboard_found, self.old_size) {
            (false, _) => parts.push("dashboard not found, layout unchanged".to_string()),
            (true, None) => parts.push("dashboard has no size, layout unchanged".to_string()),
            (true, Some((w, h))) => parts.push(format!(
                "resized from {}x{}, {} zones rescaled",
                w, h, self.zones_rescaled
            )),
        }
        if !self.asset_renames.is_empty() {
            parts.push(format!("{} asset names repaired", self.asset_renames.len()));
        }

        format!("{}: {}", self.output_path, parts.join(", "))
    }
}

/// Service that runs the extract → rescale → repackage pipeline
///
/// Each call to [`resize`](Self::resize) owns a private scratch
/// [`Workspace`], so one service can be used for any number of runs, from
/// any number of threads.
#[derive(Debug, Clone)]
pub struct ResizeService {
    settings: ResizerSettings,
    legacy_encoding: &'static Encoding,
}

impl ResizeService {
    /// Create a service from resizer settings.
    ///
    /// # Errors
    ///
    /// Returns [`ResizeError::UnknownEncoding`] if the configured legacy
    /// encoding label is not recognised.
    pub fn new(settings: ResizerSettings) -> Result<Self, ResizeError> {
        let legacy_encoding = Encoding::for_label(settings.legacy_encoding.trim().as_bytes())
            .ok_or_else(|| ResizeError::UnknownEncoding(settings.legacy_encoding.clone()))?;

        Ok(Self {
            settings,
            legacy_encoding,
        })
    }

    pub fn settings(&self) -> &ResizerSettings {
        &self.settings
    }

    /// Resize one dashboard and write the result next to the output directory.
    ///
    /// The scratch workspace is removed on every exit path. On failure no
    /// output file is left behind.
    ///
    /// # Returns
    /// A report naming the new workbook and what changed
    pub fn resize(&self, request: &ResizeRequest) -> Result<ResizeReport, ResizeError> {
        let start = Instant::now();

        // Check the source before creating any scratch directories
        if !request.workbook.is_file() {
            return Err(ResizeError::NotFound(request.workbook.clone()));
        }

        let work_dir = Utf8Path::new(&self.settings.work_dir);
        let workspace = Workspace::create(work_dir).map_err(ResizeError::io(work_dir))?;

        // The workspace is dropped (and removed) whether or not this fails
        let mut report = self.run(&workspace, request)?;

        if let Err(e) = workspace.close() {
            tracing::warn!("Failed to remove workspace: {}", e);
        }

        report.duration = start.elapsed();
        tracing::info!(
            "Resize completed in {:.2}s: {}",
            report.duration.as_secs_f32(),
            report.summary()
        );
        Ok(report)
    }

    fn run(&self, workspace: &Workspace, request: &ResizeRequest) -> Result<ResizeReport, ResizeError> {
        let options = ExtractOptions {
            asset_folders: &self.settings.asset_folders,
            legacy_encoding: self.legacy_encoding,
        };
        let workbook = Workbook::open(&request.workbook, workspace, &options)?;
        tracing::debug!(
            "Document for {:?} workbook: {}",
            workbook.kind(),
            workbook.document_path()
        );

        let document_path = workbook.document_path();
        let bytes = fs::read(document_path).map_err(ResizeError::io(document_path))?;
        let mut document = Document::from_bytes(bytes)?;
        // Rescale in memory; nothing is written until the document is complete
        let outcome = rescale_dashboard(
            &mut document,
            &request.dashboard,
            request.width,
            request.height,
        )?;

        if !outcome.dashboard_found && self.settings.strict_dashboard_lookup {
            return Err(ResizeError::ElementNotFound(request.dashboard.clone()));
        }

        // Serialize and write the new container
        let bytes = document.to_bytes()?;
        let destination = Utf8Path::new(&self.settings.output_dir).join(output_file_name(
            &request.workbook,
            chrono::Local::now().naive_local(),
        ));
        let output_path = workbook.write(&bytes, &destination)?;

        Ok(ResizeReport {
            output_path,
            dashboard_found: outcome.dashboard_found,
            old_size: outcome.old_size,
            zones_rescaled: outcome.zones_rescaled,
            asset_renames: workbook.asset_renames().to_vec(),
            duration: Duration::ZERO,
        })
    }

    /// Names of every dashboard in a workbook, in document order.
    pub fn list_dashboards(&self, workbook: &Utf8Path) -> Result<Vec<String>, ResizeError> {
        let text = read_document_text(workbook, self.legacy_encoding)?;
        let document = Document::parse(&text)?;
        Ok(document.attribute_values(DASHBOARD_TAG, "name")?)
    }
}

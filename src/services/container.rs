//! Workbook containers: flat `.twb` files and packaged `.twbx` archives.
//!
//! A flat workbook *is* its document, so opening it only records the path.
//! A packaged workbook is extracted into the run's [`Workspace`]: entry names
//! are repaired (legacy encodings, backslash separators), the `.twb` at the
//! archive root is renamed after the workbook, and the asset folders are
//! reconciled against what the document references.
//!
//! Writing always goes through a temporary file beside the destination that
//! is persisted only once complete, so a failed write leaves no artifact.

use super::reconciler::{ReferencedNames, Rename, reconcile_folder};
use super::resize::ResizeError;
use super::workspace::Workspace;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use encoding_rs::Encoding;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const DOCUMENT_EXTENSION: &str = "twb";
pub const PACKAGED_EXTENSION: &str = "twbx";

/// Directory inside the workspace that receives archive contents
const CONTENT_DIR: &str = "twbx_content";

/// Upper bound on numbered output names tried before giving up
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Kind of workbook container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbookKind {
    /// A bare `.twb` XML document
    Flat,
    /// A `.twbx` zip holding a `.twb` plus asset folders
    Packaged,
}

impl WorkbookKind {
    pub fn from_path(path: &Utf8Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case(PACKAGED_EXTENSION) => Self::Packaged,
            _ => Self::Flat,
        }
    }
}

/// Settings that control archive extraction
#[derive(Debug, Clone)]
pub struct ExtractOptions<'a> {
    /// Asset folders to reconcile, relative to the archive root
    pub asset_folders: &'a [String],
    /// Encoding assumed for entry names stored without the UTF-8 flag
    pub legacy_encoding: &'static Encoding,
}

/// An opened workbook
#[derive(Debug)]
pub struct Workbook {
    kind: WorkbookKind,
    content_dir: Option<Utf8PathBuf>,
    document_path: Utf8PathBuf,
    asset_renames: Vec<Rename>,
}

impl Workbook {
    /// Open `source`, extracting it into `workspace` if it is packaged.
    ///
    /// # Errors
    ///
    /// - [`ResizeError::NotFound`] if `source` does not exist
    /// - [`ResizeError::InvalidContainer`] if the archive is corrupt or has
    ///   entries that would escape the workspace
    /// - [`ResizeError::MissingDocument`] if the archive has no root `.twb`
    pub fn open(
        source: &Utf8Path,
        workspace: &Workspace,
        options: &ExtractOptions<'_>,
    ) -> Result<Self, ResizeError> {
        if !source.is_file() {
            return Err(ResizeError::NotFound(source.to_path_buf()));
        }

        // Flat workbooks are read in place
        let kind = WorkbookKind::from_path(source);
        if kind == WorkbookKind::Flat {
            tracing::info!("Opened flat workbook {}", source);
            return Ok(Self {
                kind,
                content_dir: None,
                document_path: source.to_path_buf(),
                asset_renames: Vec::new(),
            });
        }

        // Extract everything into the workspace under repaired names
        let content_dir = workspace.path().join(CONTENT_DIR);
        fs::create_dir_all(&content_dir).map_err(ResizeError::io(&content_dir))?;

        let entries = extract_archive(source, &content_dir, options.legacy_encoding)?;
        tracing::info!("Extracted {} entries from {}", entries, source);

        let document_path = locate_document(source, &content_dir)?;

        // Asset references are matched against the raw document text
        let document_text =
            fs::read_to_string(&document_path).map_err(ResizeError::io(&document_path))?;

        let mut asset_renames = Vec::new();
        for folder in options.asset_folders {
            let folder_path = content_dir.join(folder);
            // Not every workbook packages every asset folder
            if !folder_path.is_dir() {
                continue;
            }
            let referenced = ReferencedNames::scan(&document_text, folder);
            let renames = reconcile_folder(&folder_path, &referenced, options.legacy_encoding)
                .map_err(ResizeError::io(&folder_path))?;
            asset_renames.extend(renames.into_iter().map(|r| Rename {
                from: Utf8PathBuf::from(folder).join(r.from),
                to: Utf8PathBuf::from(folder).join(r.to),
            }));
        }

        Ok(Self {
            kind,
            content_dir: Some(content_dir),
            document_path,
            asset_renames,
        })
    }

    pub fn kind(&self) -> WorkbookKind {
        self.kind
    }

    /// The `.twb` to load: the source itself, or the extracted copy.
    pub fn document_path(&self) -> &Utf8Path {
        &self.document_path
    }

    /// Asset renames made while reconciling, relative to the archive root.
    pub fn asset_renames(&self) -> &[Rename] {
        &self.asset_renames
    }

    /// Write a new container at `destination` holding `document` in place
    /// of the original document and every other extracted file unchanged.
    ///
    /// An existing file is never replaced: if `destination` is taken, a
    /// numbered name (`<stem>_2.<ext>`, `<stem>_3.<ext>`, ...) is used instead.
    ///
    /// # Returns
    /// The path actually written
    pub fn write(&self, document: &[u8], destination: &Utf8Path) -> Result<Utf8PathBuf, ResizeError> {
        let dir = match destination.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };

        // Stage the whole artifact beside the destination first
        let mut temp = tempfile::Builder::new()
            .prefix(".dash-resizer-")
            .tempfile_in(dir)
            .map_err(ResizeError::io(dir))?;

        match &self.content_dir {
            None => temp
                .write_all(document)
                .map_err(ResizeError::io(destination))?,
            Some(content_dir) => {
                self.write_archive(content_dir, document, temp.as_file_mut())
                    .map_err(|source| ResizeError::ArchiveWrite {
                        path: destination.to_path_buf(),
                        source,
                    })?
            }
        }

        // Runs within the same second share a timestamped name
        let mut target = destination.to_path_buf();
        let mut attempt = 1;
        loop {
            match temp.persist_noclobber(&target) {
                Ok(_) => break,
                Err(e)
                    if e.error.kind() == io::ErrorKind::AlreadyExists
                        && attempt < MAX_NAME_ATTEMPTS =>
                {
                    tracing::debug!("{} already exists, trying another name", target);
                    temp = e.file;
                    attempt += 1;
                    target = numbered_path(destination, attempt);
                }
                Err(e) => return Err(ResizeError::io(&target)(e.error)),
            }
        }

        tracing::info!("Wrote {}", target);
        Ok(target)
    }

    fn write_archive(
        &self,
        content_dir: &Utf8Path,
        document: &[u8],
        file: &mut File,
    ) -> zip::result::ZipResult<()> {
        let mut zip = ZipWriter::new(file);

        for entry in WalkDir::new(content_dir).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = Utf8PathBuf::try_from(entry.into_path())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let name = archive_name(&path, content_dir)?;

            // Re-insert the edited document instead of the stale extracted copy
            if path == self.document_path {
                zip.start_file(name, entry_options(document.len() as u64))?;
                zip.write_all(document)?;
                continue;
            }

            let mut input = File::open(&path)?;
            let size = input.metadata()?.len();
            zip.start_file(name, entry_options(size))?;
            io::copy(&mut input, &mut zip)?;
        }

        zip.finish()?;
        Ok(())
    }
}

/// Output file name: `<stem>_resized_<YYYYMMDD_HHMMSS>.<ext>`.
pub fn output_file_name(source: &Utf8Path, timestamp: NaiveDateTime) -> String {
    let stem = source.file_stem().unwrap_or("workbook");
    let stamp = timestamp.format("%Y%m%d_%H%M%S");
    match source.extension() {
        Some(ext) => format!("{}_resized_{}.{}", stem, stamp, ext),
        None => format!("{}_resized_{}", stem, stamp),
    }
}

/// `dir/Book_resized_20240309_070501.twb` -> `dir/Book_resized_20240309_070501_<n>.twb`
fn numbered_path(path: &Utf8Path, n: u32) -> Utf8PathBuf {
    let stem = path.file_stem().unwrap_or("workbook");
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, n, ext),
        None => format!("{}_{}", stem, n),
    };
    path.with_file_name(name)
}

/// Decode an archive entry name.
///
/// Names flagged as UTF-8 (or plain ASCII) are taken as is. Anything else is
/// decoded with `legacy`, falling back to lossy UTF-8 when that fails.
/// Backslash separators are normalised to `/`.
pub fn decode_entry_name(raw: &[u8], utf8_flagged: bool, legacy: &'static Encoding) -> String {
    let name = if utf8_flagged || raw.is_ascii() {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        match legacy.decode_without_bom_handling_and_without_replacement(raw) {
            Some(decoded) => decoded.into_owned(),
            None => String::from_utf8_lossy(raw).into_owned(),
        }
    };
    name.replace('\\', "/")
}

/// Read the document text of a workbook without extracting it.
pub fn read_document_text(
    source: &Utf8Path,
    legacy: &'static Encoding,
) -> Result<String, ResizeError> {
    if !source.is_file() {
        return Err(ResizeError::NotFound(source.to_path_buf()));
    }

    if WorkbookKind::from_path(source) == WorkbookKind::Flat {
        return fs::read_to_string(source).map_err(ResizeError::io(source));
    }

    let file = File::open(source).map_err(ResizeError::io(source))?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| ResizeError::invalid_container(source, e))?;

    // Same choice as extraction: the lexicographically first root document
    let mut documents = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| ResizeError::invalid_container(source, e))?;
        let name = decode_entry_name(
            entry.name_raw(),
            is_utf8_flagged(entry.name_raw(), entry.name()),
            legacy,
        );
        if let Some(name) = root_document_name(&name) {
            documents.push((name, index));
        }
    }
    documents.sort();

    let Some((name, index)) = documents.into_iter().next() else {
        return Err(ResizeError::MissingDocument(source.to_path_buf()));
    };
    tracing::debug!("Reading document {} from {}", name, source);

    let mut entry = archive
        .by_index(index)
        .map_err(|e| ResizeError::invalid_container(source, e))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| ResizeError::read_failure(source, e))?;
    Ok(text)
}

fn extract_archive(
    source: &Utf8Path,
    content_dir: &Utf8Path,
    legacy: &'static Encoding,
) -> Result<usize, ResizeError> {
    let file = File::open(source).map_err(ResizeError::io(source))?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| ResizeError::invalid_container(source, e))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ResizeError::invalid_container(source, e))?;

        let name = decode_entry_name(
            entry.name_raw(),
            is_utf8_flagged(entry.name_raw(), entry.name()),
            legacy,
        );
        let relative = safe_relative_path(&name).ok_or_else(|| ResizeError::InvalidContainer {
            path: source.to_path_buf(),
            reason: format!("entry {:?} escapes the archive root", name),
        })?;
        if relative.as_str().is_empty() {
            continue;
        }

        let target = content_dir.join(&relative);

        // Directory entries only create the directory
        if name.ends_with('/') {
            fs::create_dir_all(&target).map_err(ResizeError::io(&target))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(ResizeError::io(parent))?;
        }

        tracing::debug!("Extracting {}", relative);
        let mut out = File::create(&target).map_err(ResizeError::io(&target))?;
        io::copy(&mut entry, &mut out).map_err(|e| ResizeError::read_failure(source, e))?;
    }

    Ok(archive.len())
}

/// Find the `.twb` at the archive root and rename it after the workbook.
fn locate_document(source: &Utf8Path, content_dir: &Utf8Path) -> Result<Utf8PathBuf, ResizeError> {
    let mut candidates = Vec::new();
    for entry in content_dir.read_dir_utf8().map_err(ResizeError::io(content_dir))? {
        let entry = entry.map_err(ResizeError::io(content_dir))?;
        let path = entry.path();
        if path.is_file() && has_document_extension(path) {
            candidates.push(path.to_path_buf());
        }
    }
    // Several root documents are possible; pick one deterministically
    candidates.sort();

    let found = candidates
        .into_iter()
        .next()
        .ok_or_else(|| ResizeError::MissingDocument(source.to_path_buf()))?;

    let stem = source.file_stem().unwrap_or("workbook");
    let renamed = content_dir.join(format!("{}.{}", stem, DOCUMENT_EXTENSION));
    if found != renamed {
        fs::rename(&found, &renamed).map_err(ResizeError::io(&found))?;
        tracing::debug!("Renamed document {} -> {}", found, renamed);
    }
    Ok(renamed)
}

/// Normalised name of a `.twb` entry directly at the archive root.
fn root_document_name(name: &str) -> Option<String> {
    if name.ends_with('/') {
        return None;
    }
    let path = safe_relative_path(name)?;
    (path.components().count() == 1 && has_document_extension(&path)).then(|| path.into_string())
}

fn has_document_extension(path: &Utf8Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
}

/// The zip crate decodes flagged names as UTF-8; anything else comes back
/// re-decoded, so its bytes no longer match the raw name.
fn is_utf8_flagged(raw: &[u8], decoded: &str) -> bool {
    decoded.as_bytes() == raw
}

/// Relative path for an entry name, or `None` if it would leave the root.
fn safe_relative_path(name: &str) -> Option<Utf8PathBuf> {
    let mut path = Utf8PathBuf::new();
    for segment in name.split('/').filter(|s| !s.is_empty() && *s != ".") {
        let mut components = Utf8Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Utf8Component::Normal(part)), None) => path.push(part),
            _ => return None,
        }
    }
    Some(path)
}

fn archive_name(path: &Utf8Path, content_dir: &Utf8Path) -> io::Result<String> {
    let relative = path
        .strip_prefix(content_dir)
        .map_err(|e| io::Error::other(e.to_string()))?;
    Ok(relative
        .components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/"))
}

fn entry_options(size: u64) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(size >= u64::from(u32::MAX))
}

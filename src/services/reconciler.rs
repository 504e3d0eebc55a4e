//! Filename encoding reconciliation for extracted workbook assets.
//!
//! Packaged workbooks created on some platforms store asset names in a legacy
//! regional encoding without the zip UTF-8 flag. After extraction, those
//! names can differ from what the `.twb` references (the XML always carries
//! the correct names). This module renames what is on disk so every
//! reference resolves again.
//!
//! # Algorithm
//!
//! 1. [`ReferencedNames::scan`] collects every `<folder>/...` path in the
//!    document and records, per depth below the folder, the set of valid
//!    names at that depth (in order of first appearance).
//! 2. [`reconcile_folder`] walks the extracted folder deepest entry first.
//!    Each entry whose name is not valid at its depth is redecoded
//!    ([`redecode_legacy`]), scored against every candidate at that depth
//!    ([`similarity`]) and renamed to the best one ([`best_match`]).
//!
//! Children are always renamed before their parent directory, so a rename
//! never depends on an ancestor already being correct.

use camino::{Utf8Path, Utf8PathBuf};
use encoding_rs::Encoding;
use indexmap::{IndexMap, IndexSet};
use quick_xml::escape::unescape;
use regex::Regex;
use std::fs;
use std::io;
use walkdir::WalkDir;

/// Asset folder whose paths also appear as `<image-path>` element text
pub const IMAGE_FOLDER: &str = "Image";

/// A rename performed by [`reconcile_folder`], relative to the asset folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: Utf8PathBuf,
    pub to: Utf8PathBuf,
}

/// Names referenced by a document below one asset folder, grouped by depth
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferencedNames {
    by_depth: IndexMap<usize, IndexSet<String>>,
}

impl ReferencedNames {
    /// Collect every path under `folder` that `document_text` references.
    ///
    /// Paths are recognised as single-quoted attribute values or strings
    /// (`'Data/Sheet1/image.png'`). The image folder is also referenced as
    /// `<image-path>` element text (`<image-path>Image/logo.png</image-path>`).
    /// XML escapes in a captured path are resolved before it is recorded.
    pub fn scan(document_text: &str, folder: &str) -> Self {
        let escaped = regex::escape(folder);
        let pattern = if folder == IMAGE_FOLDER {
            format!(r"<image-path>({escaped}/[^<]*)|'({escaped}/[^']*)")
        } else {
            format!(r"'({escaped}/[^']*)")
        };
        // Escaped input always yields a valid pattern
        let re = Regex::new(&pattern).expect("Invalid asset reference regex");

        let mut names = Self::default();
        for caps in re.captures_iter(document_text) {
            let Some(path) = caps.get(1).or_else(|| caps.get(2)) else {
                continue;
            };
            // The document stores `R&amp;D.csv` for a file named `R&D.csv`
            match unescape(path.as_str()) {
                Ok(path) => names.add_reference(&path),
                Err(e) => {
                    tracing::warn!("Keeping reference {} as written: {}", path.as_str(), e);
                    names.add_reference(path.as_str());
                }
            }
        }

        tracing::debug!(
            "Found references at {} depths below {}",
            names.by_depth.len(),
            folder
        );
        names
    }

    /// Record one `<folder>/a/b/c` reference.
    pub fn add_reference(&mut self, path: &str) {
        let segments = path.split('/').skip(1).filter(|s| !s.is_empty());
        for (idx, segment) in segments.enumerate() {
            self.by_depth
                .entry(idx + 1)
                .or_default()
                .insert(segment.to_string());
        }
    }

    /// Valid names at `depth` (1 = directly inside the asset folder).
    pub fn at_depth(&self, depth: usize) -> Option<&IndexSet<String>> {
        self.by_depth.get(&depth)
    }

    pub fn is_empty(&self) -> bool {
        self.by_depth.is_empty()
    }
}

/// Similarity of two strings in `[0, 1]`: `2 * LCS / (len(a) + len(b))`,
/// counted in characters. Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    // Single-row LCS table
    let mut row = vec![0usize; b.len() + 1];
    for ca in &a {
        let mut diagonal = 0;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diagonal + 1
            } else {
                above.max(row[j])
            };
            diagonal = above;
        }
    }

    (2 * row[b.len()]) as f64 / total as f64
}

/// Highest-scoring candidate for `name`. Ties go to the earliest candidate.
pub fn best_match<'a, I>(name: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&'a str, f64)> = None;
    for candidate in candidates {
        let score = similarity(name, candidate);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Undo a legacy-encoding misread of `name`.
///
/// The name is encoded back to the bytes it was most likely decoded from and
/// those bytes are read as UTF-8, dropping anything invalid. If `name` has
/// characters the legacy encoding cannot represent, it is returned as is.
pub fn redecode_legacy(name: &str, legacy: &'static Encoding) -> String {
    let (bytes, _, had_errors) = legacy.encode(name);
    if had_errors {
        return name.to_string();
    }
    String::from_utf8_lossy(&bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

/// Rename entries under `folder_path` to the names `referenced` expects.
///
/// Entries already valid at their depth are left alone, as are depths with
/// no referenced names. A rename that would overwrite an existing entry is
/// skipped with a warning.
///
/// # Errors
///
/// Returns an error if the folder cannot be walked or a rename fails.
pub fn reconcile_folder(
    folder_path: &Utf8Path,
    referenced: &ReferencedNames,
    legacy: &'static Encoding,
) -> io::Result<Vec<Rename>> {
    // contents_first puts every entry after all of its descendants
    let mut entries = Vec::new();
    for entry in WalkDir::new(folder_path)
        .min_depth(1)
        .contents_first(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        let Ok(path) = Utf8PathBuf::try_from(entry.into_path()) else {
            tracing::warn!("Skipping non UTF-8 path under {}", folder_path);
            continue;
        };
        let relative = path
            .strip_prefix(folder_path)
            .map_err(|e| io::Error::other(e.to_string()))?
            .to_path_buf();
        entries.push(relative);
    }

    let mut renames = Vec::new();
    for relative in entries {
        // Depth 1 is directly inside the asset folder
        let depth = relative.components().count();
        let Some(name) = relative.file_name() else {
            continue;
        };
        let Some(valid) = referenced.at_depth(depth) else {
            continue;
        };
        if valid.contains(name) {
            continue;
        }

        // Score the most likely original spelling against the candidates
        let redecoded = redecode_legacy(name, legacy);
        let Some(target) = best_match(&redecoded, valid.iter().map(String::as_str)) else {
            continue;
        };

        let renamed = relative.with_file_name(target);
        let from = folder_path.join(&relative);
        let to = folder_path.join(&renamed);
        // Never overwrite an entry that already has the target name
        if to.exists() {
            tracing::warn!("Not renaming {} to {}: target already exists", from, to);
            continue;
        }

        fs::rename(&from, &to)?;
        tracing::info!("Renamed {} -> {}", relative, renamed);
        renames.push(Rename {
            from: relative,
            to: renamed,
        });
    }

    Ok(renames)
}

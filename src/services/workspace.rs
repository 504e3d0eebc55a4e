//! Per-run scratch directories.
//!
//! Every resize run extracts into its own `work_<uuid>` directory, so
//! concurrent runs never share files. The directory is removed when the
//! [`Workspace`] is dropped, whichever way the run ended. Removal only
//! happens if the directory name still has the exact shape this module
//! generates.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use uuid::Uuid;

const WORK_DIR_PREFIX: &str = "work_";

/// `work_` followed by a hyphenated UUID
const WORK_DIR_NAME_LEN: usize = WORK_DIR_PREFIX.len() + 36;

/// Scoped scratch directory, removed on drop
#[derive(Debug)]
pub struct Workspace {
    path: Utf8PathBuf,
    released: bool,
}

impl Workspace {
    /// Create a fresh `work_<uuid>` directory under `parent`.
    pub fn create(parent: &Utf8Path) -> io::Result<Self> {
        let path = parent.join(format!("{}{}", WORK_DIR_PREFIX, Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        tracing::debug!("Created workspace {}", path);

        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Remove the workspace now and report failures.
    ///
    /// Dropping a workspace does the same but can only log errors.
    pub fn close(mut self) -> io::Result<()> {
        self.released = true;
        remove_workspace_dir(&self.path)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove_workspace_dir(&self.path) {
            tracing::warn!("Failed to remove workspace {}: {}", self.path, e);
        }
    }
}

/// Whether `name` has the exact shape of a generated workspace directory.
pub fn is_workspace_dir_name(name: &str) -> bool {
    name.len() == WORK_DIR_NAME_LEN
        && name
            .strip_prefix(WORK_DIR_PREFIX)
            .is_some_and(|id| Uuid::try_parse(id).is_ok())
}

fn remove_workspace_dir(path: &Utf8Path) -> io::Result<()> {
    if !path.is_dir() {
        return Ok(());
    }

    match path.file_name() {
        Some(name) if is_workspace_dir_name(name) => {
            fs::remove_dir_all(path)?;
            tracing::debug!("Removed workspace {}", path);
        }
        _ => tracing::warn!("Refusing to remove {}: not a workspace directory", path),
    }
    Ok(())
}

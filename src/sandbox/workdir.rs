//! Per-attempt working directories.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// A fresh directory owned by one attempt.
///
/// The directory is removed on [`WorkDir::cleanup`] or, failing that, on drop,
/// so every exit path releases it.
#[derive(Debug)]
pub struct WorkDir {
    /// Path to the directory.
    path: PathBuf,
    /// Unique name of the directory.
    id: String,
    /// Whether the directory has been removed.
    cleaned_up: bool,
}

impl WorkDir {
    /// Returns the directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the unique attempt identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Removes the directory and everything in it. Idempotent.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.cleaned_up {
            return Ok(());
        }

        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Sandbox(format!(
                    "failed to remove {}: {}",
                    self.path.display(),
                    e
                )))
            }
        }

        tracing::debug!(path = ?self.path, "removed attempt directory");
        self.cleaned_up = true;
        Ok(())
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.cleaned_up {
            if let Err(e) = self.cleanup() {
                tracing::error!(error = %e, path = ?self.path, "failed to cleanup attempt directory on drop");
            }
        }
    }
}

/// Hands out never-reused working directories under a root.
#[derive(Debug, Clone)]
pub struct WorkDirProvider {
    /// Parent of every attempt directory.
    root: PathBuf,
    /// Counter for unique names (shared across clones).
    counter: Arc<AtomicU64>,
}

impl WorkDirProvider {
    /// Creates a provider rooted at `root`. The root is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generate_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("attempt-{}-{}", n, uuid::Uuid::new_v4().simple())
    }

    /// Creates a new, empty directory for one attempt.
    pub fn create(&self) -> Result<WorkDir> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            Error::Sandbox(format!(
                "cannot create sandbox root {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let id = self.generate_name();
        let path = self.root.join(&id);

        // create_dir (not create_dir_all) so an existing directory is an error.
        std::fs::create_dir(&path).map_err(|e| {
            Error::Sandbox(format!("cannot create {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = ?path, "created attempt directory");

        Ok(WorkDir {
            path,
            id,
            cleaned_up: false,
        })
    }
}

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::format::OutputFormat;

/// Allocates and reclaims the on-disk artifacts of one recording session
///
/// Every path handed out by [`ClipStore::allocate`] is tracked until it is
/// deleted, so a cancelled session can reclaim everything it created.
#[derive(Debug)]
pub struct ClipStore {
    dir: PathBuf,
    format: OutputFormat,
    live: BTreeSet<PathBuf>,
}

impl ClipStore {
    pub fn new(dir: impl Into<PathBuf>, format: OutputFormat) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create artifact directory: {:?}", dir))?;

        info!("Clip store ready: {} (*.{})", dir.display(), format.extension());

        Ok(Self {
            dir,
            format,
            live: BTreeSet::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Reserve a fresh, globally unique artifact path
    ///
    /// Nothing is written; the capture device or exporter creates the file.
    pub fn allocate(&mut self) -> PathBuf {
        let path = self
            .dir
            .join(format!("{}.{}", Uuid::new_v4(), self.format.extension()));
        debug!("Allocated artifact {}", path.display());
        self.live.insert(path.clone());
        path
    }

    /// Delete an artifact and stop tracking it
    ///
    /// Returns whether a file was actually removed. Missing files are not an error.
    pub fn delete(&mut self, path: &Path) -> bool {
        self.live.remove(path);
        remove_artifact(path)
    }

    /// Stop tracking an artifact without deleting it (ownership moves to the caller)
    pub fn release(&mut self, path: &Path) -> bool {
        self.live.remove(path)
    }

    /// Delete every artifact this store still tracks
    pub fn delete_all(&mut self) -> usize {
        let paths = std::mem::take(&mut self.live);
        let removed = paths.iter().filter(|path| remove_artifact(path)).count();
        info!("Discarded {} of {} tracked artifacts", removed, paths.len());
        removed
    }

    pub fn tracked(&self) -> impl Iterator<Item = &Path> {
        self.live.iter().map(PathBuf::as_path)
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.live.contains(path)
    }
}

/// Best-effort, idempotent file removal
pub fn remove_artifact(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted artifact {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to delete artifact {}: {}", path.display(), e);
            false
        }
    }
}

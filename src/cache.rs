//! Process-local caches and the single-writer output lock.
//!
//! Both caches are explicit values passed into stages by reference — never
//! ambient module state — so test-isolated invocations cannot
//! cross-contaminate. The output lock registry is the one global: it is what
//! makes the single-writer-per-output-directory rule explicit instead of a
//! caller convention.

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    time::SystemTime,
};
use walkdir::WalkDir;

use crate::error::ForgeError;

/// Output directories currently claimed by a running pipeline.
static ACTIVE_OUTPUTS: Lazy<Mutex<BTreeSet<PathBuf>>> = Lazy::new(|| Mutex::new(BTreeSet::new()));

/// Guard claiming exclusive write access to one output directory for the
/// duration of a pipeline run. Released on drop.
#[derive(Debug)]
pub struct OutputLock {
    path: PathBuf,
}

impl OutputLock {
    /// Claim `path`, failing immediately when another run holds it.
    pub fn acquire(path: &Path) -> Result<Self, ForgeError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut active = ACTIVE_OUTPUTS.lock();
        if !active.insert(canonical.clone()) {
            return Err(ForgeError::OutputLocked(
                canonical.to_string_lossy().into_owned(),
            ));
        }
        tracing::debug!("Claimed output directory {:?}", canonical);
        Ok(OutputLock { path: canonical })
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        ACTIVE_OUTPUTS.lock().remove(&self.path);
        tracing::debug!("Released output directory {:?}", self.path);
    }
}

/// One cached directory listing: the directory mtime it was taken at and the
/// file paths found, relative to the listed directory.
type Listing = (SystemTime, Vec<PathBuf>);

/// Explicit cache object shared across stages of sequential runs within one
/// process. Safe for concurrent readers; listings are replaced atomically
/// under the write lock.
#[derive(Debug, Default)]
pub struct FactoryCache {
    listings: RwLock<HashMap<PathBuf, Listing>>,
}

impl FactoryCache {
    pub fn new() -> Self {
        FactoryCache::default()
    }

    /// Enumerate regular files under `dir`, relative to `dir`, reusing the
    /// cached listing while the directory mtime is unchanged. Symlinks are
    /// not followed.
    pub fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, ForgeError> {
        let mtime = std::fs::metadata(dir)?.modified()?;
        if let Some((cached_at, files)) = self.listings.read().get(dir) {
            if *cached_at == mtime {
                tracing::debug!("Listing cache hit for {:?}", dir);
                return Ok(files.clone());
            }
        }

        tracing::debug!("Listing {:?}", dir);
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry under {:?}: {}", dir, e);
                    continue;
                }
            };
            if entry.file_type().is_file() {
                files.push(entry.path().strip_prefix(dir)?.to_path_buf());
            }
        }

        self.listings
            .write()
            .insert(dir.to_path_buf(), (mtime, files.clone()));
        Ok(files)
    }

    /// Drop all cached listings.
    pub fn clear(&self) {
        self.listings.write().clear();
    }
}

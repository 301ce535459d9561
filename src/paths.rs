//! Output-tree path containment.
//!
//! Every file the factory emits is written through [`OutputRoot`], which
//! rejects any relative path that would resolve outside the output root —
//! traversal via `..`, absolute paths, and writes through symlinked
//! directories. Containment is enforced at every write site, not once at the
//! boundary, so a single bad path aborts only that file operation.

use std::path::{Component, Path, PathBuf};

use crate::error::ForgeError;

/// Convert a relative path to its slash-separated string form, independent of
/// the host separator. Used for graph node identity and report keys.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(os) => Some(os.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Root of one theme's output tree. Cheap to clone; holds no open handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRoot {
    root: PathBuf,
}

impl OutputRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        OutputRoot { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve `rel` inside the root, rejecting escapes.
    ///
    /// The check is lexical (`..` and absolute components are refused before
    /// touching the filesystem) plus a symlink scan over the already-existing
    /// ancestors of the destination, so a symlinked subdirectory cannot
    /// redirect a write outside the tree.
    pub fn resolve(&self, rel: impl AsRef<Path>) -> Result<PathBuf, ForgeError> {
        let rel = rel.as_ref();
        let mut clean = PathBuf::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(self.containment_violation(rel));
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(self.containment_violation(rel));
        }

        let dest = self.root.join(&clean);
        let mut ancestor = self.root.clone();
        for component in clean.components() {
            ancestor.push(component);
            match std::fs::symlink_metadata(&ancestor) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(self.containment_violation(rel));
                }
                _ => {}
            }
        }
        Ok(dest)
    }

    /// Write `bytes` to `rel`, creating parent directories as needed.
    pub async fn write(
        &self,
        rel: impl AsRef<Path>,
        bytes: impl AsRef<[u8]>,
    ) -> Result<PathBuf, ForgeError> {
        let dest = self.resolve(rel.as_ref())?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tracing::debug!("Writing {:?}", dest);
        tokio::fs::write(&dest, bytes.as_ref()).await?;
        Ok(dest)
    }

    /// Copy an external file into the tree at `rel`.
    pub async fn copy_in(
        &self,
        src: impl AsRef<Path>,
        rel: impl AsRef<Path>,
    ) -> Result<PathBuf, ForgeError> {
        let dest = self.resolve(rel.as_ref())?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tracing::debug!("Copying {:?} -> {:?}", src.as_ref(), dest);
        tokio::fs::copy(src.as_ref(), &dest).await?;
        Ok(dest)
    }

    pub async fn read_to_string(&self, rel: impl AsRef<Path>) -> Result<String, ForgeError> {
        let path = self.resolve(rel.as_ref())?;
        Ok(tokio::fs::read_to_string(&path).await?)
    }

    pub fn exists(&self, rel: impl AsRef<Path>) -> bool {
        self.resolve(rel.as_ref())
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    /// Byte size of an existing file, `None` when absent or unreadable.
    pub fn file_size(&self, rel: impl AsRef<Path>) -> Option<u64> {
        let path = self.resolve(rel.as_ref()).ok()?;
        std::fs::metadata(&path)
            .ok()
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
    }

    fn containment_violation(&self, rel: &Path) -> ForgeError {
        ForgeError::Containment {
            path: rel.to_string_lossy().into_owned(),
            root: self.root.to_string_lossy().into_owned(),
        }
    }
}

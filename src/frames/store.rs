//! On-disk storage for received frame payloads.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Error, Result};

/// Outcome of removing a connection's frames at disconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Files deleted.
    pub removed: usize,
    /// Files kept because they are still in use.
    pub retained: usize,
    /// Files that could not be deleted.
    pub failed: usize,
}

/// Writes frame payloads to UUID-named files in one directory.
///
/// # Examples
///
/// ```
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// use stepguide::frames::FrameStore;
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = FrameStore::new(dir.path().join("tmp_frames"));
/// store.ensure_dir().unwrap();
///
/// let path = store.persist(b"\xff\xd8jpeg").await.unwrap();
/// assert!(path.exists());
/// assert_eq!(path.extension().unwrap(), "jpg");
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct FrameStore {
    dir: PathBuf,
}

impl FrameStore {
    /// Create a store rooted at `dir`. The directory is not touched until
    /// [`ensure_dir`](Self::ensure_dir) or [`persist`](Self::persist).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory frames are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the frame directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be created. A
    /// connection that hits this is closed with code 1011.
    pub fn ensure_dir(&self) -> Result<&Path> {
        if !self.dir.is_dir() {
            std::fs::create_dir_all(&self.dir).map_err(|e| Error::storage(&self.dir, e))?;
            tracing::info!(dir = %self.dir.display(), "Created frame directory");
        }
        Ok(&self.dir)
    }

    /// Write a frame payload and return its path.
    pub async fn persist(&self, payload: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.jpg", Uuid::new_v4()));
        tokio::fs::write(&path, payload)
            .await
            .map_err(|e| Error::storage(&path, e))?;
        tracing::debug!(frame = %path.display(), bytes = payload.len(), "Frame persisted");
        Ok(path)
    }

    /// Delete every file in `owned` that is not in `in_use`.
    ///
    /// Files still referenced elsewhere, such as by the shared frame buffer,
    /// survive. Missing files count as removed.
    pub async fn cleanup<'a, I>(&self, owned: I, in_use: &[PathBuf]) -> CleanupReport
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let mut report = CleanupReport::default();
        for path in owned {
            if in_use.contains(path) {
                report.retained += 1;
                continue;
            }
            match tokio::fs::remove_file(path).await {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => report.removed += 1,
                Err(e) => {
                    tracing::error!(frame = %path.display(), error = %e, "Failed to remove frame");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

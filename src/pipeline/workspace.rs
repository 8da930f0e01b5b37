//! Request workspaces: one temporary directory per in-flight conversion.
//!
//! A [`Workspace`] is created after the request has been validated and its
//! bytes acquired, and removed exactly once when it goes out of scope, on
//! every exit path: success, an early `?` return, a pipeline failure, or
//! the request future being dropped on timeout or client disconnect. The
//! staged input file, the converter output and the extracted images all live
//! inside it, so one recursive removal releases everything.
//!
//! Removal failures are logged and never replace the request's own result.

use crate::error::DocParseError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

const INPUT_DIR: &str = "input";
const CONVERTED_DIR: &str = "converted";
const IMAGES_DIR: &str = "images";

/// An exclusively-owned temporary directory scoped to one request.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl Workspace {
    /// Create a fresh, uniquely-named workspace under `base` (or the system
    /// temp dir).
    pub fn acquire(base: Option<&Path>) -> Result<Self, DocParseError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("docparse-");
        let dir = match base {
            Some(base) => {
                std::fs::create_dir_all(base)
                    .map_err(|e| DocParseError::workspace(base, e))?;
                builder.tempdir_in(base)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| {
            let at = base.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
            DocParseError::workspace(at, e)
        })?;

        // Image references in emitted Markdown are absolute paths.
        let path = std::path::absolute(dir.path()).unwrap_or_else(|_| dir.path().to_path_buf());
        debug!("Workspace acquired: {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the uploaded document to `input/document{extension}`.
    ///
    /// The caller's file name is never used as a path component; only the
    /// extension is kept because office converters dispatch on it.
    pub async fn stage_input(&self, extension: &str, bytes: &[u8]) -> Result<PathBuf, DocParseError> {
        let dir = self.subdir(INPUT_DIR).await?;
        let path = dir.join(format!("document{extension}"));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| DocParseError::workspace(&path, e))?;
        debug!("Staged {} bytes at {}", bytes.len(), path.display());
        Ok(path)
    }

    /// Directory the office converter writes its PDF into.
    pub async fn converted_dir(&self) -> Result<PathBuf, DocParseError> {
        self.subdir(CONVERTED_DIR).await
    }

    /// Directory the pipeline writes extracted images into.
    pub async fn images_dir(&self) -> Result<PathBuf, DocParseError> {
        self.subdir(IMAGES_DIR).await
    }

    async fn subdir(&self, name: &str) -> Result<PathBuf, DocParseError> {
        let dir = self.path.join(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DocParseError::workspace(&dir, e))?;
        Ok(dir)
    }

    /// Remove the workspace and everything written into it.
    ///
    /// Equivalent to dropping the workspace; spelled out at the end of the
    /// happy path so the release point is visible.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!("Workspace released: {}", self.path.display()),
                Err(e) => warn!("Failed to remove workspace {}: {}", self.path.display(), e),
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.remove();
    }
}

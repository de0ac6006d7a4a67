//! Cleanup guard for short-lived credential files.

use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::warn;

/// Owns the credential files a job created and deletes them.
///
/// Call [`CredentialFilesGuard::release`] at the end of a pipeline. Files
/// still tracked when the guard is dropped (e.g. the pipeline future was
/// dropped mid-flight) are removed synchronously in `Drop`.
#[derive(Debug, Default)]
pub struct CredentialFilesGuard {
    files: Vec<PathBuf>,
}

impl CredentialFilesGuard {
    /// Creates an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking files.
    pub fn track(&mut self, files: impl IntoIterator<Item = PathBuf>) {
        self.files.extend(files);
    }

    /// Returns the tracked files.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Deletes every tracked file.
    ///
    /// Never fails: files that could not be removed are returned with the
    /// error so the caller can log them. A file that is already gone counts
    /// as removed.
    pub async fn release(&mut self) -> Vec<(PathBuf, std::io::Error)> {
        let mut failures = Vec::new();
        for path in std::mem::take(&mut self.files) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => failures.push((path, e)),
            }
        }
        failures
    }
}

impl Drop for CredentialFilesGuard {
    fn drop(&mut self) {
        for path in self.files.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove credential file");
                }
            }
        }
    }
}

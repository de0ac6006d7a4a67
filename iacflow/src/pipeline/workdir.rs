//! Working directory preparation and removal.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::commands::PLAN_FILE;
use crate::errors::IacflowError;
use crate::utils::safe_relative_path;

/// Tool state left by a previous run that must not leak into the next one.
pub const STALE_STATE: &[&str] = &[".terraform", ".terraform.lock.hcl", PLAN_FILE];

/// Creates `work_dir`, clears stale tool state and writes `files` into it.
///
/// Every file key is validated before anything is written. Returns the
/// written paths, sorted.
pub async fn prepare_work_dir(work_dir: &Path, files: &HashMap<String, String>) -> Result<Vec<PathBuf>, IacflowError> {
    let mut targets = files
        .iter()
        .map(|(key, contents)| Ok::<_, IacflowError>((safe_relative_path(key)?, contents)))
        .collect::<Result<Vec<_>, IacflowError>>()?;
    targets.sort_by(|a, b| a.0.cmp(&b.0));

    tokio::fs::create_dir_all(work_dir).await?;
    remove_stale_state(work_dir).await?;

    let mut written = Vec::with_capacity(targets.len());
    for (relative, contents) in targets {
        let path = work_dir.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, contents).await?;
        written.push(path);
    }
    Ok(written)
}

async fn remove_stale_state(work_dir: &Path) -> std::io::Result<()> {
    for name in STALE_STATE {
        let path = work_dir.join(name);
        let result = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Returns true if a prior apply left a working directory behind.
pub async fn work_dir_exists(work_dir: &Path) -> bool {
    tokio::fs::metadata(work_dir).await.is_ok_and(|m| m.is_dir())
}

/// Deletes a working directory and everything in it.
pub async fn remove_work_dir(work_dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(work_dir).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

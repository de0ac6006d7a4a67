//! Path safety checks for working directories and written files.

use std::path::{Component, Path, PathBuf};

use crate::errors::ValidationError;

/// Validates that `key` is a relative path that stays inside its root.
///
/// Returns the normalized relative path.
pub fn safe_relative_path(key: &str) -> Result<PathBuf, ValidationError> {
    if key.trim().is_empty() {
        return Err(ValidationError::UnsafePath(key.to_string()));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(key).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ValidationError::UnsafePath(key.to_string()));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(ValidationError::UnsafePath(key.to_string()));
    }
    Ok(normalized)
}

/// Validates that a workspace id can be used as a single directory name.
pub fn validate_workspace_segment(workspace_id: &str) -> Result<(), ValidationError> {
    let valid = !workspace_id.is_empty()
        && workspace_id.len() <= 128
        && workspace_id != "."
        && workspace_id != ".."
        && workspace_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidWorkspaceId(workspace_id.to_string()))
    }
}

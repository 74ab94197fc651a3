//! Path resolution for filesystem tools.
//!
//! Paths are made absolute against the working directory and resolved
//! through symlinks before policy matching, so a link inside an allowed
//! directory cannot point the tool at a file outside it.

use crate::error::ToolError;
use std::path::{Path, PathBuf};
use warden_policy::matcher::normalize_path;

/// Return the canonical working directory.
pub fn workspace_root(working_dir: &Path) -> Result<PathBuf, ToolError> {
    working_dir
        .canonicalize()
        .map_err(|e| ToolError::ExecutionError(format!("Cannot resolve working dir: {e}")))
}

/// Resolve a path that may or may not exist. Existing prefixes are
/// canonicalized; a missing tail is appended as-is.
pub fn resolve_path(path: &Path, working_dir: &Path) -> Result<PathBuf, ToolError> {
    let candidate = if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&workspace_root(working_dir)?.join(path))
    };

    if candidate.exists() {
        return candidate
            .canonicalize()
            .map_err(|e| ToolError::ExecutionError(format!("Cannot resolve path: {e}")));
    }
    let (existing_base, tail) = split_existing_ancestor(&candidate)?;
    Ok(existing_base.join(tail))
}

fn split_existing_ancestor(path: &Path) -> Result<(PathBuf, PathBuf), ToolError> {
    let mut existing = path.to_path_buf();
    let mut tail = PathBuf::new();

    while !existing.exists() {
        let name = existing.file_name().ok_or_else(|| {
            ToolError::ExecutionError(format!("Cannot resolve path: {}", path.display()))
        })?;
        tail = if tail.as_os_str().is_empty() {
            PathBuf::from(name)
        } else {
            PathBuf::from(name).join(&tail)
        };
        existing = existing
            .parent()
            .ok_or_else(|| {
                ToolError::ExecutionError(format!("Cannot resolve path: {}", path.display()))
            })?
            .to_path_buf();
    }

    let canonical_existing = existing
        .canonicalize()
        .map_err(|e| ToolError::ExecutionError(format!("Cannot resolve path: {e}")))?;

    Ok((canonical_existing, tail))
}

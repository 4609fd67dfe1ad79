//! Path normalization for file paths stored as graph/doc keys (spec §4.2,
//! §9): every stored `file_path` is relative to the scanned root, uses `/`
//! on every platform, and never carries a `..` component.

use anyhow::Result;
use std::path::{Component, Path};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
enum PathError {
    #[error("directory traversal detected in path: {0}")]
    DirectoryTraversal(String),

    #[error("invalid unicode in path component")]
    InvalidUnicode,

    #[error("empty path after normalization")]
    EmptyPath,
}

/// Normalize `path` relative to `repo_root`, forward-slashed and with `..`
/// rejected. Falls back to the path's own lossy string on any validation
/// failure rather than propagating an error — callers (the parser's file
/// walk, hook input) treat this as best-effort labeling, not a gate.
pub fn normalize_path_relative(path: &Path, repo_root: &Path) -> String {
    normalize_relative(path, repo_root).unwrap_or_else(|e| {
        warn!("path normalization failed: {e}, using fallback");
        path.to_string_lossy().to_string()
    })
}

fn normalize_relative(path: &Path, repo_root: &Path) -> Result<String> {
    let relative = if path.is_absolute() && repo_root.is_absolute() {
        path.strip_prefix(repo_root).unwrap_or(path)
    } else {
        path
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part_str = part.to_str().ok_or(PathError::InvalidUnicode)?;
                parts.push(part_str);
            }
            Component::ParentDir => {
                return Err(PathError::DirectoryTraversal(relative.to_string_lossy().to_string()).into());
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if parts.is_empty() {
        return Err(PathError::EmptyPath.into());
    }

    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_repo_root_and_uses_forward_slashes() {
        let repo_root = Path::new("/home/user/project");
        let path = Path::new("/home/user/project/src/main.rs");
        assert_eq!(normalize_path_relative(path, repo_root), "src/main.rs");
    }

    #[test]
    fn already_relative_path_is_unchanged() {
        let repo_root = Path::new("/home/user/project");
        let path = Path::new("src/main.rs");
        assert_eq!(normalize_path_relative(path, repo_root), "src/main.rs");
    }

    #[test]
    fn directory_traversal_falls_back_to_lossy_string() {
        let repo_root = Path::new("/home/user/project");
        let path = Path::new("../../../etc/passwd");
        assert_eq!(
            normalize_path_relative(path, repo_root),
            "../../../etc/passwd"
        );
    }

    #[test]
    fn unicode_path_components_are_preserved() {
        let repo_root = Path::new("/home/user/project");
        let path = Path::new("src/файл.rs");
        assert_eq!(normalize_path_relative(path, repo_root), "src/файл.rs");
    }
}

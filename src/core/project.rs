//! Project root discovery

use std::path::{Path, PathBuf};

use crate::error::{ContainerError, Result};

/// First ancestor of `start` (inclusive) that contains `manifest`.
///
/// Fails when no ancestor up to the filesystem root has one.
pub fn find_project_root(start: &Path, manifest: &str) -> Result<PathBuf> {
    let start = start
        .canonicalize()
        .map_err(|e| ContainerError::io(start, e))?;

    start
        .ancestors()
        .find(|dir| dir.join(manifest).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| ContainerError::ProjectRootNotFound {
            manifest: manifest.to_string(),
            start: start.clone(),
        })
}

/// Explicit root if given, otherwise discovery from the current directory
pub fn resolve_project_root(explicit: Option<&Path>, manifest: &str) -> Result<PathBuf> {
    match explicit {
        Some(root) => root.canonicalize().map_err(|e| ContainerError::io(root, e)),
        None => {
            let cwd = std::env::current_dir().map_err(|e| ContainerError::io(".", e))?;
            find_project_root(&cwd, manifest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_finds_manifest_in_ancestor() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), "").unwrap();
        let nested = dir.path().join("src/scanner/core");
        fs::create_dir_all(&nested).unwrap();

        let root = find_project_root(&nested, "pyproject.toml").unwrap();
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_start_directory_is_inclusive() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pyproject.toml"), "").unwrap();
        let root = find_project_root(dir.path(), "pyproject.toml").unwrap();
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_missing_manifest_is_error() {
        let dir = TempDir::new().unwrap();
        let err = find_project_root(dir.path(), "no-such-manifest-8f3a.toml").unwrap_err();
        assert!(matches!(err, ContainerError::ProjectRootNotFound { .. }));
    }

    #[test]
    fn test_explicit_root_used_as_given() {
        let dir = TempDir::new().unwrap();
        let root = resolve_project_root(Some(dir.path()), "pyproject.toml").unwrap();
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }
}

//! Cache key computation
//!
//! The key is a SHA-256 over the manifest bytes followed by every regular file
//! under the source tree, in sorted path order. Only contents are hashed, so
//! the key does not depend on the host's path separator or traversal order.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{ContainerError, Result};

/// Length of the key prefix used as an image tag
pub const TAG_LEN: usize = 12;

/// Compiled artifacts that never affect the installed package
const SKIPPED_SUFFIXES: &[&str] = &["pyc", "pyo"];

/// Full lowercase hex digest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fixed-length prefix used as the image tag
    pub fn short(&self) -> &str {
        &self.0[..TAG_LEN]
    }
}

/// Hash `<root>/<manifest>` then every file under `<root>/<source_subdir>`.
///
/// Missing manifest or source tree contribute nothing. Read failures are
/// errors: a key computed over a partial tree would silently go stale.
pub fn compute_key(root: &Path, manifest: &str, source_subdir: &str) -> Result<CacheKey> {
    let mut hasher = Sha256::new();

    let manifest_path = root.join(manifest);
    if manifest_path.is_file() {
        hash_file(&manifest_path, &mut hasher)?;
    }

    let source_root = root.join(source_subdir);
    if source_root.is_dir() {
        for path in source_files(&source_root)? {
            hash_file(&path, &mut hasher)?;
        }
    }

    Ok(CacheKey(format!("{:x}", hasher.finalize())))
}

fn source_files(source_root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(source_root) {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| source_root.to_path_buf());
            ContainerError::io(path, e.into())
        })?;

        let path = entry.path();
        // follows symlinks to files, like the package installer does
        if !path.is_file() || is_skipped(path) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    // Path ordering is component-wise, independent of the separator
    files.sort();
    Ok(files)
}

fn is_skipped(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SKIPPED_SUFFIXES.contains(&ext))
        .unwrap_or(false)
}

fn hash_file(path: &Path, hasher: &mut Sha256) -> Result<()> {
    let file = File::open(path).map_err(|e| ContainerError::io(path, e))?;
    hash_reader(file, path, hasher)
}

fn hash_reader(mut reader: impl Read, path: &Path, hasher: &mut Sha256) -> Result<()> {
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| ContainerError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(())
}

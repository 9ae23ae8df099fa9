//! Cache module - Content-addressed derived images
//!
//! - `key`: digest over the manifest and source tree
//! - `image`: base image pull, cache-hit check, provisioning and commit

pub mod image;
pub mod key;

use std::fmt;

pub use image::{CacheState, ImageManager};
pub use key::{compute_key, CacheKey};

/// `repository:tag` of a derived image; the tag is the short cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CachedImageRef {
    pub repository: String,
    pub tag: String,
}

impl CachedImageRef {
    pub fn new(repository: impl Into<String>, key: &CacheKey) -> Self {
        Self {
            repository: repository.into(),
            tag: key.short().to_string(),
        }
    }
}

impl fmt::Display for CachedImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

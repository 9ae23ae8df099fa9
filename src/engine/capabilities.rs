//! Engine dialect detection
//!
//! Docker and Podman share an API but differ in two places we care about:
//! SELinux relabeling of bind mounts and support for `shm_size`.

use tracing::{debug, warn};

use super::ContainerEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities {
    /// Bind mount modes need the `Z` relabel option
    pub needs_relabel: bool,
    /// The engine honours an explicit shared-memory size
    pub supports_shm_limit: bool,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self::docker()
    }
}

impl EngineCapabilities {
    pub fn docker() -> Self {
        Self {
            needs_relabel: false,
            supports_shm_limit: true,
        }
    }

    pub fn podman() -> Self {
        Self {
            needs_relabel: true,
            supports_shm_limit: false,
        }
    }

    /// Shared-memory size to request, dropped where unsupported
    pub fn shm_size(&self, requested: Option<i64>) -> Option<i64> {
        if self.supports_shm_limit {
            requested
        } else {
            None
        }
    }

    /// Classify an engine from its version component names
    pub fn from_components<S: AsRef<str>>(components: &[S]) -> Self {
        let is_podman = components
            .iter()
            .any(|name| name.as_ref().to_lowercase().starts_with("podman"));

        if is_podman {
            Self::podman()
        } else {
            Self::docker()
        }
    }

    /// Query the engine once; any failure falls back to Docker behaviour
    pub async fn detect(engine: &dyn ContainerEngine) -> Self {
        match engine.version_components().await {
            Ok(components) => {
                let caps = Self::from_components(components.as_slice());
                debug!("Engine components {:?} -> {:?}", components, caps);
                caps
            }
            Err(e) => {
                warn!("Engine version query failed ({}), assuming Docker", e);
                Self::docker()
            }
        }
    }
}

//! Error types for image preparation and dispatch
//!
//! Setup and build failures are errors. A task container that exits non-zero
//! is not an error; it is reported through its exit code.

use std::path::PathBuf;

use crate::engine::EngineError;

pub type Result<T> = std::result::Result<T, ContainerError>;

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Engine unreachable, pull failure or any other API failure
    #[error("container engine error: {0}")]
    Engine(#[from] EngineError),

    /// Provisioning container exited non-zero; `logs` holds its captured output
    #[error("cached image build failed with exit code {code}\n{logs}")]
    CacheBuild { code: i64, logs: String },

    #[error("no {manifest} found in {start:?} or any parent directory")]
    ProjectRootNotFound { manifest: String, start: PathBuf },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// User interrupt before a container was started
    #[error("interrupted by user")]
    Interrupted,
}

impl ContainerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

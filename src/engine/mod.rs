//! Engine module - Container runtime abstraction
//!
//! This module provides the seam between the runner and the container engine:
//! - `ContainerEngine`: the operations the runner needs from an engine
//! - `ContainerRunSpec`: one container's full launch configuration
//! - `EngineCapabilities`: dialect differences, resolved once at startup
//!
//! The engine module does NOT:
//! - Decide which image to run (that's the dispatcher's job)
//! - Compute cache keys
//! - Interpret exit codes

pub mod capabilities;
pub mod docker;
#[cfg(test)]
pub mod fake;
pub mod spec;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

use crate::cache::CachedImageRef;

pub use capabilities::EngineCapabilities;
pub use docker::DockerEngine;
pub use spec::{ContainerRunSpec, Mount, MountMode, PortMapping};

/// Live output of a container, as raw byte chunks
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, EngineError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    #[error("wait for container {0} ended without a status")]
    NoWaitStatus(String),

    #[error("{0}")]
    Other(String),
}

/// Operations the runner performs against a container engine
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Component names reported by the engine's version endpoint
    async fn version_components(&self) -> Result<Vec<String>, EngineError>;

    /// Whether an image reference is present in the local store
    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError>;

    /// Pull an image into the local store
    async fn pull_image(&self, reference: &str) -> Result<(), EngineError>;

    /// Create and start a detached container, returning its id
    async fn run_detached(&self, spec: &ContainerRunSpec) -> Result<String, EngineError>;

    /// Follow the combined stdout/stderr of a container
    fn logs(&self, id: &str) -> LogStream;

    /// Everything the container has written so far
    async fn collect_logs(&self, id: &str) -> Result<String, EngineError>;

    /// Block until the container stops and return its exit code
    async fn wait(&self, id: &str) -> Result<i64, EngineError>;

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), EngineError>;

    /// Commit a stopped container as `image`
    async fn commit(&self, id: &str, image: &CachedImageRef) -> Result<(), EngineError>;

    async fn remove(&self, id: &str, force: bool) -> Result<(), EngineError>;
}

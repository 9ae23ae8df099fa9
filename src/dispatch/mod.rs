//! Dispatch module - Runs one task container end to end
//!
//! This module provides:
//! - `Dispatcher`: picks the cached or uncached path, launches, streams, reaps
//! - `DispatchOptions`: per-call knobs (cache use, rebuild, streaming, port)
//! - `commands`: the shell scripts run inside containers
//!
//! The dispatch module does NOT:
//! - Parse command lines
//! - Interpret the task's exit code (it is forwarded as-is)

pub mod commands;

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheState, ImageManager};
use crate::config::ContainerConfig;
use crate::core::sentinel::{IN_CONTAINER_ENV, IN_CONTAINER_VALUE};
use crate::engine::{ContainerEngine, ContainerRunSpec, PortMapping};
use crate::error::Result;
use crate::host::HostBridge;
use crate::reaper::{short_id, LogStreamer, Reaper};

use commands::{bash, cached_script, uncached_script, TaskKind};

/// Container port the API server listens on
pub const API_CONTAINER_PORT: u16 = 8008;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub task: TaskKind,
    pub use_cache: bool,
    pub rebuild_cache: bool,
    pub stream_logs: bool,
    /// Host port for `TaskKind::Serve`
    pub host_port: Option<u16>,
    /// Merged after the base environment and the in-container marker
    pub extra_env: BTreeMap<String, String>,
}

impl DispatchOptions {
    pub fn new(task: TaskKind) -> Self {
        Self {
            task,
            use_cache: true,
            rebuild_cache: false,
            stream_logs: true,
            host_port: None,
            extra_env: BTreeMap::new(),
        }
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_rebuild(mut self, rebuild_cache: bool) -> Self {
        self.rebuild_cache = rebuild_cache;
        self
    }

    pub fn with_streaming(mut self, stream_logs: bool) -> Self {
        self.stream_logs = stream_logs;
        self
    }

    pub fn with_host_port(mut self, port: u16) -> Self {
        self.host_port = Some(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a dispatched run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    pub exit_code: i64,
    pub interrupted: bool,
}

pub struct Dispatcher {
    engine: Arc<dyn ContainerEngine>,
    config: ContainerConfig,
    host: HostBridge,
    images: ImageManager,
    streamer: LogStreamer,
    reaper: Reaper,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        config: ContainerConfig,
        host: HostBridge,
        streamer: LogStreamer,
        reaper: Reaper,
    ) -> Self {
        let images = ImageManager::new(
            engine.clone(),
            config.clone(),
            host.clone(),
            streamer.clone(),
            reaper.clone(),
        );
        Self {
            engine,
            config,
            host,
            images,
            streamer,
            reaper,
        }
    }

    pub fn images(&self) -> &ImageManager {
        &self.images
    }

    /// Run one task container and report its exit code.
    ///
    /// Errors cover everything up to a successful launch, including an
    /// interrupt before any container started. Once the container is
    /// running, failures show up in the exit code and the container is
    /// always removed.
    pub async fn dispatch(&self, options: &DispatchOptions) -> Result<RunResult> {
        self.host.prepare_host_dirs()?;

        let spec = if options.use_cache {
            self.cached_spec(options).await?
        } else {
            self.uncached_spec(options).await?
        };

        info!(
            "Starting {} container from {} ...",
            options.task.label(),
            spec.image
        );
        if let Some(port) = spec.port {
            info!("API available at http://127.0.0.1:{}", port.host_port);
        }
        self.reaper.interrupt().check()?;
        let id = self.engine.run_detached(&spec).await?;
        info!("Container {} started", short_id(&id));

        let streamed_interrupt = if options.stream_logs {
            self.streamer.stream(&id).await
        } else {
            false
        };
        let reaped = self.reaper.reap(&id).await;

        info!(
            "Container {} exited with code {}",
            short_id(&id),
            reaped.exit_code
        );
        Ok(RunResult {
            exit_code: reaped.exit_code,
            interrupted: streamed_interrupt || reaped.interrupted,
        })
    }

    async fn cached_spec(&self, options: &DispatchOptions) -> Result<ContainerRunSpec> {
        let (mut image, state) = self.images.lookup().await?;
        if options.rebuild_cache || state == CacheState::CacheMiss {
            image = self.images.prepare_cached_image().await?;
        } else {
            info!("Using cached image {}", image);
        }

        let user = self.host.identity().map(|id| id.to_string());
        Ok(self
            .task_spec(&image.to_string(), options)
            .with_command(bash(cached_script(&self.config, options.task)))
            .with_user(user))
    }

    async fn uncached_spec(&self, options: &DispatchOptions) -> Result<ContainerRunSpec> {
        self.images.ensure_base_image().await?;
        let script = uncached_script(&self.config, options.task, self.host.identity());
        Ok(self
            .task_spec(&self.config.base_image, options)
            .with_command(bash(script))
            .with_user(Some("root".to_string())))
    }

    fn task_spec(&self, image: &str, options: &DispatchOptions) -> ContainerRunSpec {
        let mut spec = self.host.run_spec(image);
        let mut env = spec.env.clone();
        env.insert(IN_CONTAINER_ENV.to_string(), IN_CONTAINER_VALUE.to_string());
        env.extend(options.extra_env.clone());
        spec = spec.with_env(env);

        if options.task == TaskKind::Serve {
            let host_port = options.host_port.unwrap_or(API_CONTAINER_PORT);
            spec = spec.with_port(Some(PortMapping {
                container_port: API_CONTAINER_PORT,
                host_port,
            }));
        }
        spec
    }
}

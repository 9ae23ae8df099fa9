//! Image lifecycle: base image, cache lookup and cached image builds
//!
//! `prepare_cached_image` is the only path that adds cache entries to the
//! local image store. Two concurrent builds for the same project may both
//! commit the same tag; runs are assumed to be one per project at a time.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::{compute_key, CacheKey, CachedImageRef};
use crate::config::ContainerConfig;
use crate::core::exit_code::ExitStatus;
use crate::dispatch::commands::{bash, provision_script};
use crate::engine::ContainerEngine;
use crate::error::{ContainerError, Result};
use crate::host::HostBridge;
use crate::reaper::{remove_container, LogStreamer, Reaper};

/// Where an image resolution currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    NoBaseImage,
    BaseImagePresent,
    CacheMiss,
    CacheHit,
    Provisioning,
    Committed,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheState::NoBaseImage => "no_base_image",
            CacheState::BaseImagePresent => "base_image_present",
            CacheState::CacheMiss => "cache_miss",
            CacheState::CacheHit => "cache_hit",
            CacheState::Provisioning => "provisioning",
            CacheState::Committed => "committed",
        };
        write!(f, "{}", s)
    }
}

pub struct ImageManager {
    engine: Arc<dyn ContainerEngine>,
    config: ContainerConfig,
    host: HostBridge,
    streamer: LogStreamer,
    reaper: Reaper,
}

impl ImageManager {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        config: ContainerConfig,
        host: HostBridge,
        streamer: LogStreamer,
        reaper: Reaper,
    ) -> Self {
        Self {
            engine,
            config,
            host,
            streamer,
            reaper,
        }
    }

    /// Pull the base image unless it is already present
    pub async fn ensure_base_image(&self) -> Result<CacheState> {
        let base = &self.config.base_image;
        if self.engine.image_exists(base).await? {
            debug!("Base image {} present", base);
            return Ok(CacheState::BaseImagePresent);
        }

        debug!("state={} image={}", CacheState::NoBaseImage, base);
        self.reaper.interrupt().check()?;
        info!("Pulling base image: {}", base);
        tokio::select! {
            biased;
            _ = self.reaper.interrupt().triggered() => {
                info!("Interrupted by user; pull of {} abandoned", base);
                Err(ContainerError::Interrupted)
            }
            pulled = self.engine.pull_image(base) => {
                pulled?;
                Ok(CacheState::BaseImagePresent)
            }
        }
    }

    /// Key over the current source tree; never cached between calls
    pub fn cache_key(&self) -> Result<CacheKey> {
        compute_key(
            self.host.project_root(),
            &self.config.manifest_name,
            &self.config.source_subdir,
        )
    }

    pub fn cached_image_ref(&self) -> Result<CachedImageRef> {
        Ok(CachedImageRef::new(&self.config.cache_repo, &self.cache_key()?))
    }

    /// Lookup only; never builds
    pub async fn cached_image_exists(&self, image: &CachedImageRef) -> Result<bool> {
        Ok(self.engine.image_exists(&image.to_string()).await?)
    }

    /// Hit or miss for the current source tree
    pub async fn lookup(&self) -> Result<(CachedImageRef, CacheState)> {
        let image = self.cached_image_ref()?;
        let state = if self.cached_image_exists(&image).await? {
            CacheState::CacheHit
        } else {
            CacheState::CacheMiss
        };
        debug!("state={} image={}", state, image);
        Ok((image, state))
    }

    /// Build the cached image for the current source tree.
    ///
    /// Runs the provisioning script as root in the base image, commits the
    /// stopped container under the cache tag and removes it. A non-zero exit
    /// fails with the container's captured output. An interrupt before the
    /// container starts fails with `ContainerError::Interrupted`.
    pub async fn prepare_cached_image(&self) -> Result<CachedImageRef> {
        self.ensure_base_image().await?;
        self.host.prepare_host_dirs()?;

        let image = self.cached_image_ref()?;
        info!("Building cached image {} ...", image);
        debug!("state={} image={}", CacheState::Provisioning, image);

        let spec = self
            .host
            .run_spec(&self.config.base_image)
            .with_command(bash(provision_script(&self.config)))
            .with_user(Some("root".to_string()));
        self.reaper.interrupt().check()?;
        let id = self.engine.run_detached(&spec).await?;

        let interrupted = self.streamer.stream(&id).await;
        let reaped = self.reaper.wait(&id).await;
        let interrupted = interrupted || reaped.interrupted;

        if interrupted || reaped.exit_code != 0 {
            let logs = match self.engine.collect_logs(&id).await {
                Ok(logs) => logs,
                Err(e) => format!("<container output unavailable: {}>", e),
            };
            remove_container(self.engine.as_ref(), &id).await;
            let code = if reaped.exit_code == 0 {
                ExitStatus::INTERRUPTED as i64
            } else {
                reaped.exit_code
            };
            return Err(ContainerError::CacheBuild { code, logs });
        }

        info!("Committing image: {}", image);
        let committed = self.engine.commit(&id, &image).await;
        remove_container(self.engine.as_ref(), &id).await;
        committed?;

        debug!("state={} image={}", CacheState::Committed, image);
        info!("Cached image ready: {}", image);
        Ok(image)
    }
}

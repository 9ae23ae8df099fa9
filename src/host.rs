//! Host side of a run: directories, bind mounts and identity

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::ContainerConfig;
use crate::engine::{ContainerRunSpec, EngineCapabilities, Mount, MountMode};
use crate::error::{ContainerError, Result};

/// Host uid/gid that task containers run as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl HostIdentity {
    /// Identity of the current process; `None` where uids don't exist
    pub fn current() -> Option<Self> {
        #[cfg(unix)]
        {
            Some(Self {
                uid: nix::unistd::getuid().as_raw(),
                gid: nix::unistd::getgid().as_raw(),
            })
        }
        #[cfg(not(unix))]
        {
            None
        }
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

#[derive(Debug, Clone)]
pub struct HostBridge {
    project_root: PathBuf,
    data_dir: PathBuf,
    container_repo_path: String,
    container_data_path: String,
    relabel: bool,
    shm_size: Option<i64>,
    base_env: BTreeMap<String, String>,
    identity: Option<HostIdentity>,
}

impl HostBridge {
    pub fn new(project_root: &Path, config: &ContainerConfig, caps: EngineCapabilities) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            data_dir: project_root.join(&config.data_subdir),
            container_repo_path: config.workdir.clone(),
            container_data_path: config.container_data_path(),
            relabel: caps.needs_relabel,
            shm_size: caps.shm_size(config.shm_size),
            base_env: config.env.clone(),
            identity: HostIdentity::current(),
        }
    }

    /// Override the detected identity
    pub fn with_identity(mut self, identity: Option<HostIdentity>) -> Self {
        self.identity = identity;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn identity(&self) -> Option<HostIdentity> {
        self.identity
    }

    /// Create the data directory so the engine doesn't create it as root
    pub fn prepare_host_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| ContainerError::io(&self.data_dir, e))?;
        debug!("Host data directory ready at {:?}", self.data_dir);
        Ok(())
    }

    /// Copy a site archive to `<data>/unzip/site.zip`, where the scanner looks for it
    pub fn stage_site_archive(&self, archive: &Path) -> Result<PathBuf> {
        let unzip_dir = self.data_dir.join("unzip");
        std::fs::create_dir_all(&unzip_dir).map_err(|e| ContainerError::io(&unzip_dir, e))?;
        let target = unzip_dir.join("site.zip");
        std::fs::copy(archive, &target).map_err(|e| ContainerError::io(archive, e))?;
        debug!("Staged {:?} at {:?}", archive, target);
        Ok(target)
    }

    /// Repository read-only at the workdir, data directory read-write below it
    pub fn mounts(&self) -> Vec<Mount> {
        vec![
            Mount {
                host_path: self.project_root.clone(),
                container_path: self.container_repo_path.clone(),
                mode: MountMode::ReadOnly,
                relabel: self.relabel,
            },
            Mount {
                host_path: self.data_dir.clone(),
                container_path: self.container_data_path.clone(),
                mode: MountMode::ReadWrite,
                relabel: self.relabel,
            },
        ]
    }

    /// Launch spec with the workdir, base environment, mounts and shm size
    /// filled in; callers add the command, user and any extra environment.
    pub fn run_spec(&self, image: &str) -> ContainerRunSpec {
        ContainerRunSpec::new(image, self.container_repo_path.clone())
            .with_env(self.base_env.clone())
            .with_mounts(self.mounts())
            .with_shm_size(self.shm_size)
    }
}

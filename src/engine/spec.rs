//! Container launch configuration

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Access mode of a bind mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    fn as_str(&self) -> &'static str {
        match self {
            MountMode::ReadOnly => "ro",
            MountMode::ReadWrite => "rw",
        }
    }
}

/// A host directory bound into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub mode: MountMode,
    /// Append the SELinux private relabel option (`Z`)
    pub relabel: bool,
}

impl Mount {
    /// Mode annotation, e.g. `ro` or `rw,Z`
    pub fn mode_string(&self) -> String {
        if self.relabel {
            format!("{},Z", self.mode.as_str())
        } else {
            self.mode.as_str().to_string()
        }
    }

    /// Engine bind string: `host:container:mode`
    pub fn bind_string(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            self.mode_string()
        )
    }
}

/// Container port published on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

impl PortMapping {
    /// Key used by the engine API, e.g. `8008/tcp`
    pub fn container_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

/// Full launch configuration for one container.
///
/// Built once per run with the `with_*` methods and then only borrowed.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRunSpec {
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub env: BTreeMap<String, String>,
    /// `root` or `uid:gid`; `None` keeps the image default
    pub user: Option<String>,
    pub mounts: Vec<Mount>,
    /// Shared memory size in bytes
    pub shm_size: Option<i64>,
    pub port: Option<PortMapping>,
}

impl ContainerRunSpec {
    pub fn new(image: impl Into<String>, working_dir: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: Vec::new(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            user: None,
            mounts: Vec::new(),
            shm_size: None,
            port: None,
        }
    }

    pub fn with_command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn with_mounts(mut self, mounts: Vec<Mount>) -> Self {
        self.mounts = mounts;
        self
    }

    pub fn with_shm_size(mut self, shm_size: Option<i64>) -> Self {
        self.shm_size = shm_size;
        self
    }

    pub fn with_port(mut self, port: Option<PortMapping>) -> Self {
        self.port = port;
        self
    }

    /// Environment as `KEY=value` pairs
    pub fn env_pairs(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    pub fn binds(&self) -> Vec<String> {
        self.mounts.iter().map(Mount::bind_string).collect()
    }

    /// The shell script passed to `bash -lc`, if the command has that form
    pub fn script(&self) -> Option<&str> {
        match self.command.as_slice() {
            [shell, flag, script] if shell == "bash" && flag == "-lc" => Some(script.as_str()),
            _ => None,
        }
    }
}

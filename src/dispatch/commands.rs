//! Shell scripts run inside task and provisioning containers
//!
//! The repository is mounted read-only, so the package is installed from a
//! private copy staged under `/tmp/src` (without the data directory).

use crate::config::ContainerConfig;
use crate::host::HostIdentity;

/// Throwaway venv used by uncached runs
pub const UNCACHED_VENV_PATH: &str = "/tmp/venv";
const STAGING_DIR: &str = "/tmp/src";
const BOOTSTRAP_PACKAGE: &str = "python3-venv";

/// What the container runs once the environment is ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// One-off scan of the site archive in the data directory
    Scan,
    /// Scan of live URLs given through the environment
    LiveScan,
    /// Long-running API server
    Serve,
}

impl TaskKind {
    /// Arguments after the venv's `python`
    pub fn entry_args(&self) -> &'static str {
        match self {
            TaskKind::Scan => "-m scanner.main",
            TaskKind::LiveScan => "scan_live_site.py",
            TaskKind::Serve => "-m scanner.web.server",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Scan => "scanner",
            TaskKind::LiveScan => "live scanner",
            TaskKind::Serve => "API server",
        }
    }
}

/// `bash -lc <script>`
pub fn bash(script: String) -> Vec<String> {
    vec!["bash".to_string(), "-lc".to_string(), script]
}

fn bootstrap(config: &ContainerConfig, venv: &str, clean_apt_lists: bool) -> String {
    let mut steps = vec![
        "apt-get update -y".to_string(),
        format!(
            "apt-get install -y --no-install-recommends {}",
            BOOTSTRAP_PACKAGE
        ),
    ];
    if clean_apt_lists {
        steps.push("rm -rf /var/lib/apt/lists/*".to_string());
    }
    steps.extend([
        format!("rm -rf {staging} && mkdir -p {staging}", staging = STAGING_DIR),
        format!(
            "cp -a {workdir}/. {staging} && rm -rf {staging}/{data}",
            workdir = config.workdir,
            staging = STAGING_DIR,
            data = config.data_subdir
        ),
        format!("python3 -m venv {}", venv),
        format!("{}/bin/pip install --no-cache-dir {}", venv, STAGING_DIR),
    ]);
    steps.join(" && ")
}

/// Provisioning for a cached image: install into the persistent venv
pub fn provision_script(config: &ContainerConfig) -> String {
    format!(
        "set -euo pipefail; {}",
        bootstrap(config, &config.venv_path, true)
    )
}

/// Run the task with the venv baked into the cached image
pub fn cached_script(config: &ContainerConfig, task: TaskKind) -> String {
    format!(
        "set -e; cd {}; {}/bin/python {}",
        config.workdir,
        config.venv_path,
        task.entry_args()
    )
}

/// Bootstrap, install and run in one go.
///
/// Runs as root; afterwards the data directory is handed back to `owner` and
/// the task's own exit status is kept.
pub fn uncached_script(
    config: &ContainerConfig,
    task: TaskKind,
    owner: Option<HostIdentity>,
) -> String {
    let mut script = format!(
        "set -euo pipefail; {}; cd {}; status=0; {}/bin/python {} || status=$?",
        bootstrap(config, UNCACHED_VENV_PATH, false),
        config.workdir,
        UNCACHED_VENV_PATH,
        task.entry_args()
    );
    if let Some(owner) = owner {
        script.push_str(&format!(
            "; chown -R {} {} || true",
            owner,
            config.container_data_path()
        ));
    }
    script.push_str("; exit $status");
    script
}

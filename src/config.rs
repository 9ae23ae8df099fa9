//! Runner configuration
//!
//! Defaults, overlaid by an optional `a11y-container.toml` at the project root
//! and then by environment variables.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{ContainerError, Result};

pub const CONFIG_FILE_NAME: &str = "a11y-container.toml";

pub const DEFAULT_BASE_IMAGE: &str = "mcr.microsoft.com/playwright/python:v1.54.0-jammy";
pub const DEFAULT_CACHE_REPO: &str = "a11y-scanner-cache";
pub const DEFAULT_VENV_PATH: &str = "/opt/a11y/venv";
pub const DEFAULT_SHM_SIZE: &str = "2g";

/// Container runner configuration
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Vendor image with the browser-automation runtime
    pub base_image: String,
    /// Repository name of derived cached images
    pub cache_repo: String,
    /// Virtual environment baked into cached images
    pub venv_path: String,
    /// Mount point of the project inside the container
    pub workdir: String,
    /// Host data directory, relative to the project root; also mounted under `workdir`
    pub data_subdir: String,
    /// Shared memory size in bytes (ignored by engines without shm support)
    pub shm_size: Option<i64>,
    /// Base environment for every container
    pub env: BTreeMap<String, String>,
    /// Grace period for stop requests
    pub stop_timeout: Duration,
    /// File whose presence marks the project root
    pub manifest_name: String,
    /// Installable source tree, relative to the project root
    pub source_subdir: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        env.insert("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string());

        Self {
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            cache_repo: DEFAULT_CACHE_REPO.to_string(),
            venv_path: DEFAULT_VENV_PATH.to_string(),
            workdir: "/worksrc".to_string(),
            data_subdir: "data".to_string(),
            shm_size: parse_byte_size(DEFAULT_SHM_SIZE).ok(),
            env,
            stop_timeout: Duration::from_secs(5),
            manifest_name: "pyproject.toml".to_string(),
            source_subdir: "src".to_string(),
        }
    }
}

/// `[container]` table of the TOML file; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawContainerConfig {
    base_image: Option<String>,
    cache_repo: Option<String>,
    venv_path: Option<String>,
    workdir: Option<String>,
    data_subdir: Option<String>,
    shm_size: Option<String>,
    stop_timeout_secs: Option<u64>,
    manifest_name: Option<String>,
    source_subdir: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfigFile {
    #[serde(default)]
    container: RawContainerConfig,
}

impl ContainerConfig {
    /// Load configuration for a project root
    pub fn load(project_root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let file = project_root.join(CONFIG_FILE_NAME);
        if file.is_file() {
            let content =
                std::fs::read_to_string(&file).map_err(|e| ContainerError::io(&file, e))?;
            config.apply_toml(&content)?;
            debug!("Loaded container config from {:?}", file);
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_toml(&mut self, content: &str) -> Result<()> {
        let raw: RawConfigFile = toml::from_str(content)
            .map_err(|e| ContainerError::Config(format!("{}: {}", CONFIG_FILE_NAME, e)))?;
        let raw = raw.container;

        if let Some(v) = raw.base_image {
            self.base_image = v;
        }
        if let Some(v) = raw.cache_repo {
            self.cache_repo = v;
        }
        if let Some(v) = raw.venv_path {
            self.venv_path = v;
        }
        if let Some(v) = raw.workdir {
            self.workdir = v;
        }
        if let Some(v) = raw.data_subdir {
            self.data_subdir = v;
        }
        if let Some(v) = raw.shm_size {
            self.shm_size = parse_optional_size(&v)?;
        }
        if let Some(v) = raw.stop_timeout_secs {
            self.stop_timeout = Duration::from_secs(v);
        }
        if let Some(v) = raw.manifest_name {
            self.manifest_name = v;
        }
        if let Some(v) = raw.source_subdir {
            self.source_subdir = v;
        }
        self.env.extend(raw.env);
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("A11Y_BASE_IMAGE") {
            self.base_image = v;
        }
        if let Some(v) = var("A11Y_CACHE_REPO") {
            self.cache_repo = v;
        }
        if let Some(v) = var("A11Y_SHM_SIZE") {
            self.shm_size = parse_optional_size(&v)?;
        }
        if let Some(v) = var("A11Y_STOP_TIMEOUT_SECS") {
            let secs = v.trim().parse::<u64>().map_err(|_| {
                ContainerError::Config(format!("A11Y_STOP_TIMEOUT_SECS is not a number: {}", v))
            })?;
            self.stop_timeout = Duration::from_secs(secs);
        }
        Ok(())
    }

    /// In-container path of the data directory
    pub fn container_data_path(&self) -> String {
        format!(
            "{}/{}",
            self.workdir.trim_end_matches('/'),
            self.data_subdir
        )
    }
}

/// Empty string disables the limit
fn parse_optional_size(value: &str) -> Result<Option<i64>> {
    if value.trim().is_empty() {
        Ok(None)
    } else {
        parse_byte_size(value).map(Some)
    }
}

/// Parse sizes like `2g`, `512m`, `64k` or plain bytes
pub fn parse_byte_size(value: &str) -> Result<i64> {
    let value = value.trim().to_lowercase();
    let value = value.strip_suffix('b').unwrap_or(&value);

    let (digits, multiplier) = match value.chars().last() {
        Some('k') => (&value[..value.len() - 1], 1024),
        Some('m') => (&value[..value.len() - 1], 1024 * 1024),
        Some('g') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };

    let number = digits
        .trim()
        .parse::<i64>()
        .map_err(|_| ContainerError::Config(format!("invalid size: {:?}", value)))?;
    if number <= 0 {
        return Err(ContainerError::Config(format!(
            "size must be positive: {:?}",
            value
        )));
    }
    number
        .checked_mul(multiplier)
        .ok_or_else(|| ContainerError::Config(format!("size too large: {:?}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("2g").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_byte_size("512M").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_byte_size("64kb").unwrap(), 64 * 1024);
        assert_eq!(parse_byte_size("4096").unwrap(), 4096);
        assert!(parse_byte_size("lots").is_err());
        assert!(parse_byte_size("0g").is_err());
        assert!(parse_byte_size("").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.base_image, DEFAULT_BASE_IMAGE);
        assert_eq!(config.container_data_path(), "/worksrc/data");
        assert_eq!(config.shm_size, Some(2 * 1024 * 1024 * 1024));
        assert_eq!(config.env["PYTHONUNBUFFERED"], "1");
        assert_eq!(config.stop_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_toml_overlay() {
        let mut config = ContainerConfig::default();
        config
            .apply_toml(
                r#"
[container]
base_image = "registry.local/playwright:custom"
shm_size = ""
stop_timeout_secs = 10

[container.env]
HTTP_PROXY = "http://proxy:3128"
"#,
            )
            .unwrap();

        assert_eq!(config.base_image, "registry.local/playwright:custom");
        assert_eq!(config.shm_size, None);
        assert_eq!(config.stop_timeout, Duration::from_secs(10));
        assert_eq!(config.env["HTTP_PROXY"], "http://proxy:3128");
        assert_eq!(config.env["DEBIAN_FRONTEND"], "noninteractive");
    }

    #[test]
    fn test_toml_unknown_field_rejected() {
        let mut config = ContainerConfig::default();
        let err = config
            .apply_toml("[container]\nbase_imag = \"typo\"\n")
            .unwrap_err();
        assert!(matches!(err, ContainerError::Config(_)));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("A11Y_CACHE_REPO", "my-cache"),
            ("A11Y_SHM_SIZE", "1g"),
            ("A11Y_STOP_TIMEOUT_SECS", "2"),
        ]
        .into_iter()
        .collect();

        let mut config = ContainerConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.cache_repo, "my-cache");
        assert_eq!(config.shm_size, Some(1024 * 1024 * 1024));
        assert_eq!(config.stop_timeout, Duration::from_secs(2));
        assert_eq!(config.base_image, DEFAULT_BASE_IMAGE);
    }

    #[test]
    fn test_env_bad_timeout() {
        let mut config = ContainerConfig::default();
        let result = config.apply_env(|k| (k == "A11Y_STOP_TIMEOUT_SECS").then(|| "soon".into()));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_reads_project_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[container]\nvenv_path = \"/opt/custom\"\n",
        )
        .unwrap();
        let config = ContainerConfig::load(dir.path()).unwrap();
        assert_eq!(config.venv_path, "/opt/custom");
    }
}

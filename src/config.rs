use crate::error::{MirrorError, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MODERN_DESCRIPTOR: &str = "/etc/apt/sources.list.d/debian.sources";
pub const LEGACY_DESCRIPTOR: &str = "/etc/apt/sources.list";
pub const UPSTREAM_HOST: &str = "deb.debian.org";
pub const UPSTREAM_SECURITY_HOST: &str = "security.debian.org";
pub const APT_MIRROR_HOST: &str = "mirrors.aliyun.com";

pub const PIP_GLOBAL_CONFIG: &str = "/etc/pip.conf";
pub const PIP_INDEX_URL: &str = "https://pypi.tuna.tsinghua.edu.cn/simple";
pub const PIP_TRUSTED_HOST: &str = "pypi.tuna.tsinghua.edu.cn";

pub const APP_PORT: u16 = 8000;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub apt: AptSettings,
    pub pip: PipSettings,
    pub toolchain: ToolchainSettings,
    pub app: AppSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AptSettings {
    pub modern_descriptor: PathBuf,
    pub legacy_descriptor: PathBuf,
    /// Replaced in this order, each one globally.
    pub upstream_hosts: Vec<String>,
    pub mirror_host: String,
    pub backup: bool,
}

impl Default for AptSettings {
    fn default() -> Self {
        Self {
            modern_descriptor: PathBuf::from(MODERN_DESCRIPTOR),
            legacy_descriptor: PathBuf::from(LEGACY_DESCRIPTOR),
            upstream_hosts: vec![
                UPSTREAM_HOST.to_string(),
                UPSTREAM_SECURITY_HOST.to_string(),
            ],
            mirror_host: APT_MIRROR_HOST.to_string(),
            backup: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipSettings {
    pub config_path: PathBuf,
    pub index_url: String,
    pub trusted_host: String,
    /// Executable used for `install -r <manifest>`
    pub program: String,
    pub backup: bool,
}

impl Default for PipSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(PIP_GLOBAL_CONFIG),
            index_url: PIP_INDEX_URL.to_string(),
            trusted_host: PIP_TRUSTED_HOST.to_string(),
            program: "pip".to_string(),
            backup: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainSettings {
    pub packages: Vec<String>,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            packages: vec!["gcc".to_string(), "python3-dev".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppSettings {
    /// Dependency list, relative to `source_dir`
    pub manifest: PathBuf,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub exclude: Vec<String>,
    pub server: String,
    pub module: String,
    pub host: String,
    pub port: u16,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("requirements.txt"),
            source_dir: PathBuf::from("."),
            target_dir: PathBuf::from("/app"),
            exclude: vec![
                ".git".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
            ],
            server: "uvicorn".to_string(),
            module: "main:app".to_string(),
            host: "0.0.0.0".to_string(),
            port: APP_PORT,
        }
    }
}

impl Settings {
    /// Resolve settings.
    /// Strategy:
    /// 1. Explicit `--config` path (must exist)
    /// 2. User config (~/.config/mirrorbuild/settings.toml)
    /// 3. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Some(path) = user_config_path() {
            if path.is_file() {
                return Self::from_file(&path);
            }
            debug!("No user config at {:?}, using defaults", path);
        }

        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                MirrorError::Custom(format!("Config file not found: {:?}", path))
            }
            _ => MirrorError::access(path, e),
        })?;
        let settings = Self::parse(&content)?;
        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "mirrorbuild").map(|dirs| dirs.config_dir().join("settings.toml"))
}

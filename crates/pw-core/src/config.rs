use crate::exec::CommandPrefix;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Daemon-side settings for both policy handlers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Prepended to every ebtables/ipset invocation, e.g. "sudo"
    #[serde(default)]
    pub cmd_prefix: CommandPrefix,
    #[serde(flatten)]
    pub handler: HandlerConfig,
    #[serde(default)]
    pub ebtables: EbtablesConfig,
    #[serde(default)]
    pub ipset: IpsetConfig,
}

/// Where a handler keeps its working files and failed-transaction copies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerConfig {
    #[serde(default = "default_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_dir")]
    pub recovery_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EbtablesConfig {
    #[serde(default = "default_ebtables")]
    pub program: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpsetConfig {
    #[serde(default = "default_ipset")]
    pub program: String,
    #[serde(default = "default_set_type")]
    pub set_type: String,
    #[serde(default = "default_family")]
    pub family: String,
    #[serde(default = "default_hashsize")]
    pub hashsize: u32,
    #[serde(default = "default_maxelem")]
    pub maxelem: u32,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse pwarden config YAML")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::from_yaml(&content)
    }
}

impl HandlerConfig {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            work_dir: dir.clone(),
            recovery_dir: dir,
        }
    }

    pub fn recovery_path(&self, name: &str) -> PathBuf {
        self.recovery_dir.join(name)
    }
}

impl IpsetConfig {
    /// Options trailing the set name on every emitted `create` line.
    pub fn create_options(&self) -> String {
        format!(
            "{} family {} hashsize {} maxelem {}",
            self.set_type, self.family, self.hashsize, self.maxelem
        )
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self::in_dir(default_dir())
    }
}

impl Default for EbtablesConfig {
    fn default() -> Self {
        Self {
            program: default_ebtables(),
        }
    }
}

impl Default for IpsetConfig {
    fn default() -> Self {
        Self {
            program: default_ipset(),
            set_type: default_set_type(),
            family: default_family(),
            hashsize: default_hashsize(),
            maxelem: default_maxelem(),
        }
    }
}

fn default_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_ebtables() -> String {
    "ebtables".to_string()
}

fn default_ipset() -> String {
    "ipset".to_string()
}

fn default_set_type() -> String {
    "hash:net".to_string()
}

fn default_family() -> String {
    "inet".to_string()
}

fn default_hashsize() -> u32 {
    2048
}

fn default_maxelem() -> u32 {
    65536
}

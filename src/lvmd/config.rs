//! Daemon configuration
//!
//! Loaded once at startup from a YAML file; validated through registry
//! construction.

use crate::error::Result;
use crate::lvmd::device_class::DeviceClass;
use crate::lvmd::option_class::LvcreateOptionClass;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/carve/lvmd.yaml";

fn default_socket_name() -> PathBuf {
    PathBuf::from("/run/carve/lvmd.sock")
}

/// Root of the daemon's YAML configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LvmdConfig {
    /// UNIX-domain socket the daemon listens on.
    #[serde(default = "default_socket_name")]
    pub socket_name: PathBuf,
    #[serde(default)]
    pub device_classes: Vec<DeviceClass>,
    #[serde(default)]
    pub lvcreate_option_classes: Vec<LvcreateOptionClass>,
}

impl LvmdConfig {
    /// Read and parse the configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

//! Configuration file support for sdoboot.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SDOBOOT_*)
//! 3. Local config file (./sdoboot.toml)
//! 4. Global config file (~/.config/sdoboot/config.toml)
//!
//! `--config <PATH>` replaces 3 and 4 with a single file.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::debug;
use sdoboot::{DEFAULT_CAPACITY, NodeId, sdo::MAX_SEGMENT_LEN};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CliError;

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "sdoboot.toml";

/// Channel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Command/response buffer size in bytes.
    pub capacity: Option<usize>,
    /// Read timeout in 10 ms units (255 waits forever).
    pub read_timeout_units: Option<u8>,
    /// Bytes per emulated download segment (1..=7).
    pub fragment_size: Option<usize>,
}

/// Debug console configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
}

/// Node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// CANopen node-ID reported by simulations.
    pub node_id: Option<u8>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Channel configuration.
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Console configuration.
    #[serde(default)]
    pub console: ConsoleConfig,
    /// Node configuration.
    #[serde(default)]
    pub node: NodeConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                config.merge(Self::load_from_file(&global_path)?);
                debug!("Loaded global config from {}", global_path.display());
            }
        }

        let local_path = Path::new(LOCAL_CONFIG_FILE);
        if local_path.exists() {
            config.merge(Self::load_from_file(local_path)?);
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let config = Self::load_from_file(path)?;
        debug!("Loaded config from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))
            .map_err(|e| CliError::Config(format!("{e:#}")))?;
        toml::from_str(&content).map_err(|e| {
            CliError::Config(format!(
                "Invalid TOML in config file {}: {e}",
                path.display()
            ))
            .into()
        })
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "sdoboot").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Set values win.
    fn merge(&mut self, other: Self) {
        if other.channel.capacity.is_some() {
            self.channel.capacity = other.channel.capacity;
        }
        if other.channel.read_timeout_units.is_some() {
            self.channel.read_timeout_units = other.channel.read_timeout_units;
        }
        if other.channel.fragment_size.is_some() {
            self.channel.fragment_size = other.channel.fragment_size;
        }

        if other.console.serial.is_some() {
            self.console.serial = other.console.serial;
        }
        if other.console.baud.is_some() {
            self.console.baud = other.console.baud;
        }

        if other.node.node_id.is_some() {
            self.node.node_id = other.node.node_id;
        }
    }

    /// Reject values the library would refuse later anyway.
    pub fn validate(&self) -> Result<()> {
        if self.channel.capacity == Some(0) {
            return Err(CliError::Config("[channel] capacity must be at least 1".into()).into());
        }
        if let Some(size) = self.channel.fragment_size {
            if !(1..=MAX_SEGMENT_LEN).contains(&size) {
                return Err(CliError::Config(format!(
                    "[channel] fragment_size must be 1..={MAX_SEGMENT_LEN}, got {size}"
                ))
                .into());
            }
        }
        if let Some(id) = self.node.node_id {
            NodeId::try_from(id).map_err(|e| CliError::Config(format!("[node] {e}")))?;
        }
        Ok(())
    }

    /// Effective buffer capacity.
    pub fn capacity(&self) -> usize {
        self.channel
            .capacity
            .unwrap_or(DEFAULT_CAPACITY)
    }

    /// Effective segment size.
    pub fn fragment_size(&self) -> usize {
        self.channel
            .fragment_size
            .unwrap_or(MAX_SEGMENT_LEN)
    }

    /// Effective read timeout in 10 ms units.
    pub fn read_timeout_units(&self) -> u8 {
        self.channel
            .read_timeout_units
            .unwrap_or(sdoboot::clock::FOREVER_UNITS)
    }
}

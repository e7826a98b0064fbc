// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller configuration.
//!
//! Supports both programmatic and TOML file-based configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Address the switch listener binds to (default: 0.0.0.0)
    #[serde(default = "default_listen")]
    pub listen: IpAddr,

    /// TCP port switches connect to (default: 6633, 0 = ephemeral)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address of the HTTP control API (default: 127.0.0.1)
    #[serde(default = "default_api_address")]
    pub api_address: IpAddr,

    /// Port of the HTTP control API (default: 8181, 0 = ephemeral)
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Root of the `author/napp_name` directory tree
    #[serde(default = "default_napps_dir")]
    pub napps_dir: PathBuf,

    /// NApps loaded at startup and kept across a regular unload
    #[serde(default = "default_core_napps")]
    pub core_napps: Vec<String>,

    /// Upper bound for joining controller threads on stop (seconds)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Log filter used by the binary
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    6633
}

fn default_api_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_api_port() -> u16 {
    8181
}

fn default_napps_dir() -> PathBuf {
    PathBuf::from("/var/lib/kyco/napps")
}

fn default_core_napps() -> Vec<String> {
    vec![crate::napps::switch_inventory::NAPP_NAME.to_string()]
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            api_address: default_api_address(),
            api_port: default_api_port(),
            napps_dir: default_napps_dir(),
            core_napps: default_core_napps(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            log_level: default_log_level(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Configuration suited to tests: loopback, ephemeral ports, no core NApps.
    pub fn ephemeral(napps_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            api_port: 0,
            napps_dir: napps_dir.into(),
            core_napps: Vec::new(),
            shutdown_timeout_secs: 5,
            ..Default::default()
        }
    }

    /// Get the shutdown timeout as Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shutdown_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "shutdown_timeout_secs cannot be 0".into(),
            ));
        }
        if self.napps_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("napps_dir cannot be empty".into()));
        }
        if self.port != 0 && self.port == self.api_port && self.listen == self.api_address {
            return Err(ConfigError::Invalid(format!(
                "switch listener and API both bound to {}:{}",
                self.listen, self.port
            )));
        }
        for name in &self.core_napps {
            if name.split('/').filter(|s| !s.is_empty()).count() != 2 {
                return Err(ConfigError::Invalid(format!(
                    "core NApp '{}' is not of the form author/napp_name",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.port, 6633);
        assert_eq!(config.api_port, 8181);
        assert_eq!(config.api_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.core_napps, vec!["kyco/switch_inventory".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ControllerConfig = toml::from_str(
            r#"
            port = 6653
            napps_dir = "/tmp/napps"
            "#,
        )
        .expect("parse");
        assert_eq!(config.port, 6653);
        assert_eq!(config.napps_dir, PathBuf::from("/tmp/napps"));
        assert_eq!(config.api_port, 8181);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kyco.toml");

        let config = ControllerConfig {
            port: 6653,
            log_level: "debug".into(),
            ..Default::default()
        };
        config.to_file(&path).expect("write");

        let loaded = ControllerConfig::from_file(&path).expect("load");
        assert_eq!(loaded.port, 6653);
        assert_eq!(loaded.log_level, "debug");
    }

    #[test]
    fn test_validation_zero_timeout() {
        let config = ControllerConfig {
            shutdown_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_port_clash() {
        let config = ControllerConfig {
            listen: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8181,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_core_napp_name() {
        let config = ControllerConfig {
            core_napps: vec!["inventory".into()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ephemeral_config_is_valid() {
        let config = ControllerConfig::ephemeral("/tmp/napps");
        assert_eq!(config.port, 0);
        assert_eq!(config.api_port, 0);
        assert!(config.core_napps.is_empty());
        assert!(config.validate().is_ok());
    }
}

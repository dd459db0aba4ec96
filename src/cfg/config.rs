// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    cfg::logger::LogConfig,
    client::{discovery::ScanConfig, ds2ftp::Ds2FtpConfig, sftp::SftpConfig},
    models::nsdu::NetworkType,
};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),
    #[error("invalid port number: {0}")]
    InvalidPort(u32),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(f64),
    #[error("invalid number of workers: {0}")]
    InvalidWorkers(usize),
}

/// Optional YAML configuration. Every section has working defaults; the CLI
/// only overrides what its flags cover.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub logger: LogConfig,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub sftp: SftpSettings,
    #[serde(default)]
    pub ds2ftp: Ds2FtpSettings,
}

/// Discovery sweep defaults.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DiscoverySettings {
    #[serde(default = "defaults::discovery_port")]
    pub port: u16,
    #[serde(default = "defaults::buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "defaults::timeout", with = "serde_secs")]
    pub timeout: Duration,
    #[serde(default = "defaults::max_workers")]
    pub max_workers: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SftpSettings {
    #[serde(default = "defaults::timeout", with = "serde_secs")]
    pub timeout: Duration,
    /// NB framing carries the CRC trailer; BB does not.
    #[serde(default)]
    pub network: NetworkType,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Ds2FtpSettings {
    #[serde(default = "defaults::ds2ftp_ctrl_port")]
    pub ctrl_port: u16,
    #[serde(default = "defaults::ds2ftp_data_port")]
    pub data_port: u16,
    #[serde(default = "defaults::timeout", with = "serde_secs")]
    pub timeout: Duration,
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: usize,
}

mod defaults {
    use std::time::Duration;

    pub fn discovery_port() -> u16 {
        22960
    }
    pub fn buffer_size() -> usize {
        4096
    }
    pub fn timeout() -> Duration {
        Duration::from_secs(5)
    }
    pub fn max_workers() -> usize {
        255
    }
    pub fn ds2ftp_ctrl_port() -> u16 {
        23105
    }
    pub fn ds2ftp_data_port() -> u16 {
        23104
    }
    pub fn chunk_size() -> usize {
        0x3C8C0
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            port: defaults::discovery_port(),
            buffer_size: defaults::buffer_size(),
            timeout: defaults::timeout(),
            max_workers: defaults::max_workers(),
        }
    }
}

impl Default for SftpSettings {
    fn default() -> Self {
        Self {
            timeout: defaults::timeout(),
            network: NetworkType::default(),
        }
    }
}

impl Default for Ds2FtpSettings {
    fn default() -> Self {
        Self {
            ctrl_port: defaults::ds2ftp_ctrl_port(),
            data_port: defaults::ds2ftp_data_port(),
            timeout: defaults::timeout(),
            chunk_size: defaults::chunk_size(),
        }
    }
}

impl Config {
    /// Loads the configuration from YAML and validates it.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for port in [
            self.discovery.port,
            self.ds2ftp.ctrl_port,
            self.ds2ftp.data_port,
        ] {
            if port == 0 {
                return Err(ConfigError::InvalidPort(0));
            }
        }
        for timeout in [
            self.discovery.timeout,
            self.sftp.timeout,
            self.ds2ftp.timeout,
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidTimeout(timeout.as_secs_f64()));
            }
        }
        if !(1..=1000).contains(&self.discovery.max_workers) {
            return Err(ConfigError::InvalidWorkers(self.discovery.max_workers));
        }
        Ok(())
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            port: self.discovery.port,
            buffer_size: self.discovery.buffer_size,
            timeout: self.discovery.timeout,
            max_workers: self.discovery.max_workers,
        }
    }

    pub fn sftp_config(&self, host: &str, port: u16) -> SftpConfig {
        SftpConfig {
            host: host.to_string(),
            port,
            timeout: self.sftp.timeout,
            network: self.sftp.network,
        }
    }

    pub fn ds2ftp_config(&self, host: &str, ctrl_port: u16, data_port: u16) -> Ds2FtpConfig {
        Ds2FtpConfig {
            host: host.to_string(),
            ctrl_port,
            data_port,
            timeout: self.ds2ftp.timeout,
            chunk_size: self.ds2ftp.chunk_size,
        }
    }
}

/// Serde helpers representing a `Duration` as fractional seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(|_| D::Error::custom("invalid timeout"))
    }
}

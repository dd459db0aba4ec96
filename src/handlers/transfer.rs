// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use std::path::Path;

use anyhow::{Context, Result};

use crate::{
    cfg::{
        cli::ProtocolArgs,
        config::{Config, ConfigError},
        enums::Protocol,
    },
    client::{ds2ftp::Ds2FtpClient, sftp::SftpClient},
};

/// A terminal endpoint as named on the command line.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub ctrl_port: Option<u16>,
    pub data_port: Option<u16>,
}

impl Target {
    pub fn new(host: String, port: u16, args: &ProtocolArgs) -> Self {
        Self {
            host,
            port,
            protocol: args.protocol,
            ctrl_port: args.ctrl_port,
            data_port: args.data_port,
        }
    }

    /// DS2FTP port defaulting: the data port is the main port, the control
    /// port sits one above it.
    pub fn ds2_ports(&self) -> Result<(u16, u16), ConfigError> {
        let data = checked_port(self.data_port.unwrap_or(self.port))?;
        let ctrl = match self.ctrl_port {
            Some(port) => checked_port(port)?,
            None => data
                .checked_add(1)
                .ok_or(ConfigError::InvalidPort(u32::from(data) + 1))?,
        };
        Ok((ctrl, data))
    }

    /// SFTP endpoint port, validated.
    pub fn sftp_port(&self) -> Result<u16, ConfigError> {
        checked_port(self.port)
    }
}

fn checked_port(port: u16) -> Result<u16, ConfigError> {
    if port == 0 {
        return Err(ConfigError::InvalidPort(0));
    }
    Ok(port)
}

/// Downloads `(dir, file)` over the target's protocol. The connection is
/// released on every exit path.
pub async fn download_file(
    cfg: &Config,
    target: &Target,
    dir: u32,
    file: u32,
    dest: &Path,
) -> Result<u64> {
    match target.protocol {
        Protocol::Sftp => {
            let dir = sftp_dir(dir)?;
            let client = SftpClient::connect(&cfg.sftp_config(&target.host, target.sftp_port()?)).await?;
            let result = client.download_file(dir, file, dest).await;
            let _ = client.disconnect().await;
            result
        },
        Protocol::Ds2Ftp => {
            let (ctrl, data) = target.ds2_ports()?;
            let client = Ds2FtpClient::connect(&cfg.ds2ftp_config(&target.host, ctrl, data)).await?;
            let result = client.download_file(dir, file, dest).await;
            client.disconnect().await;
            result
        },
    }
}

/// Uploads `src` as `(dir, file)` over the target's protocol.
pub async fn upload_file(
    cfg: &Config,
    target: &Target,
    src: &Path,
    dir: u32,
    file: u32,
) -> Result<u64> {
    match target.protocol {
        Protocol::Sftp => {
            let dir = sftp_dir(dir)?;
            let client = SftpClient::connect(&cfg.sftp_config(&target.host, target.sftp_port()?)).await?;
            let result = client.upload_file(src, dir, file).await;
            let _ = client.disconnect().await;
            result
        },
        Protocol::Ds2Ftp => {
            let (ctrl, data) = target.ds2_ports()?;
            let client = Ds2FtpClient::connect(&cfg.ds2ftp_config(&target.host, ctrl, data)).await?;
            let result = client.upload_file(src, dir, file).await;
            client.disconnect().await;
            result
        },
    }
}

/// SFTP carries the directory number as a 16-bit field.
pub(super) fn sftp_dir(dir: u32) -> Result<u16> {
    u16::try_from(dir).with_context(|| format!("directory number out of range for sftp: {dir}"))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use std::path::Path;

use anyhow::Result;
use chrono::{Datelike, Local, NaiveDate};
use tracing::{info, warn};

use crate::{
    cfg::{config::Config, enums::Protocol},
    client::{ds2ftp::Ds2FtpClient, sftp::SftpClient},
    handlers::transfer::{Target, sftp_dir},
};

/// Directory numbers a terminal can expose.
const DIR_RANGE: std::ops::RangeInclusive<u32> = 1..=9998;

/// File numbers worth probing inside a directory: every `j · 10^i` for
/// `j ∈ 1..=9, i ∈ 0..=5`, then today's `1MMDD` capture file.
pub fn candidate_files(today: NaiveDate) -> Vec<u32> {
    let mut files: Vec<u32> = (0..=5)
        .flat_map(|i| (1..=9).map(move |j| j * 10u32.pow(i)))
        .collect();
    files.push(10000 + today.month() * 100 + today.day());
    files
}

/// Walks every directory number and reports the first file found in each.
/// With `dest` set, found files are downloaded to `{dest}/{dir}.{file}`.
pub async fn search_dirs(cfg: &Config, target: &Target, dest: Option<&Path>) -> Result<()> {
    let files = candidate_files(Local::now().date_naive());
    if let Some(dest) = dest {
        tokio::fs::create_dir_all(dest).await?;
    }
    info!(
        "searching directories {}..={} over {}",
        DIR_RANGE.start(),
        DIR_RANGE.end(),
        target.protocol
    );

    match target.protocol {
        Protocol::Sftp => {
            let client = SftpClient::connect(&cfg.sftp_config(&target.host, target.sftp_port()?)).await?;
            let result = search_sftp(&client, &files, dest).await;
            let _ = client.disconnect().await;
            result
        },
        Protocol::Ds2Ftp => {
            let (ctrl, data) = target.ds2_ports()?;
            let client = Ds2FtpClient::connect(&cfg.ds2ftp_config(&target.host, ctrl, data)).await?;
            let result = search_ds2ftp(&client, &files, dest).await;
            client.disconnect().await;
            result
        },
    }
}

async fn search_sftp(client: &SftpClient, files: &[u32], dest: Option<&Path>) -> Result<()> {
    for dir in DIR_RANGE {
        let dir = sftp_dir(dir)?;
        for &file in files {
            if !sftp_exists(client, dir, file).await {
                continue;
            }
            report_found(u32::from(dir), file);
            if let Some(dest) = dest {
                let path = dest.join(format!("{dir}.{file}"));
                if let Err(e) = client.download_file(dir, file, &path).await {
                    warn!("failed to download {dir}.{file}: {e:#}");
                }
            }
            break;
        }
    }
    Ok(())
}

async fn search_ds2ftp(client: &Ds2FtpClient, files: &[u32], dest: Option<&Path>) -> Result<()> {
    for dir in DIR_RANGE {
        for &file in files {
            if !client.exists_file(dir, file).await {
                continue;
            }
            report_found(dir, file);
            if let Some(dest) = dest {
                let path = dest.join(format!("{dir}.{file}"));
                if let Err(e) = client.download_file(dir, file, &path).await {
                    warn!("failed to download {dir}.{file}: {e:#}");
                }
            }
            break;
        }
    }
    Ok(())
}

/// Existence probe over SFTP: download into a throwaway path, count any
/// received byte as a hit.
async fn sftp_exists(client: &SftpClient, dir: u16, file: u32) -> bool {
    let Ok(tmp) = tempfile::Builder::new().prefix("dknw-exists-").tempfile() else {
        return false;
    };
    matches!(client.download_file(dir, file, tmp.path()).await, Ok(n) if n > 0)
}

fn report_found(dir: u32, file: u32) {
    println!("{dir}.{file}");
}

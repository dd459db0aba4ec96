// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use std::{fmt, net::Ipv4Addr, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use ipnet::Ipv4Net;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::Semaphore,
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, info};

use crate::{
    cfg::config::ConfigError,
    models::discovery::{Message, TerminalTypeResponse, blank_request},
};

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub port: u16,
    pub buffer_size: usize,
    pub timeout: Duration,
    pub max_workers: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            port: 22960,
            buffer_size: 4096,
            timeout: Duration::from_secs(5),
            max_workers: 255,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(0));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(self.timeout.as_secs_f64()));
        }
        if !(1..=1000).contains(&self.max_workers) {
            return Err(ConfigError::InvalidWorkers(self.max_workers));
        }
        Ok(())
    }
}

/// One responding terminal.
#[derive(Debug, Clone)]
pub struct TerminalReport {
    pub addr: Ipv4Addr,
    pub response: TerminalTypeResponse,
}

impl fmt::Display for TerminalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.response;
        write!(
            f,
            "{}: protocol_version={} model_id={} model_sub_id={} serial={} \
             software_version={} bb_index={} printer_version={}",
            self.addr,
            r.protocol_version,
            r.model_id,
            r.model_sub_id,
            r.serial,
            r.software_version,
            r.bb_index,
            r.printer_version
        )
    }
}

/// All addresses of the CIDR, multicast and reserved ranges excluded.
pub fn valid_addresses(cidr: &str) -> Result<Vec<Ipv4Addr>, ConfigError> {
    let net: Ipv4Net = cidr
        .parse()
        .map_err(|_| ConfigError::InvalidCidr(cidr.to_string()))?;

    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    Ok((start..=end)
        .map(Ipv4Addr::from)
        .filter(|addr| !addr.is_multicast() && addr.octets()[0] < 240)
        .collect())
}

async fn probe(addr: Ipv4Addr, cfg: &ScanConfig) -> Result<TerminalTypeResponse> {
    let mut stream = timeout(cfg.timeout, TcpStream::connect((addr, cfg.port)))
        .await
        .context("connect timeout")?
        .context("connect failed")?;

    stream.write_all(&blank_request().to_bytes()).await?;

    let mut buf = vec![0u8; cfg.buffer_size];
    let n = timeout(cfg.timeout, stream.read(&mut buf))
        .await
        .context("receive timeout")?
        .context("receive failed")?;
    if n == 0 {
        bail!("no response");
    }

    match Message::parse(&buf[..n])? {
        Message::GetTerminalTypeResponse(response) => Ok(response),
        other => bail!("unexpected message type 0x{:04x}", other.message_type()),
    }
}

/// Sweeps every address in `target`, printing a one-line report per
/// responding terminal as results come in. Per-address failures are
/// swallowed; a sweep always completes.
pub async fn scan_terminals(cfg: &ScanConfig, target: &str) -> Result<Vec<TerminalReport>> {
    cfg.validate()?;
    let addresses = valid_addresses(target)?;
    info!(
        "scanning {} addresses with {} workers (timeout: {:?})",
        addresses.len(),
        cfg.max_workers,
        cfg.timeout
    );

    let semaphore = Arc::new(Semaphore::new(cfg.max_workers));
    let cfg = Arc::new(cfg.clone());
    let mut tasks = JoinSet::new();
    for addr in addresses {
        let semaphore = Arc::clone(&semaphore);
        let cfg = Arc::clone(&cfg);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            match probe(addr, &cfg).await {
                Ok(response) => Some(TerminalReport { addr, response }),
                Err(e) => {
                    debug!("failed to communicate with {addr}: {e:#}");
                    None
                },
            }
        });
    }

    let mut reports = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Ok(Some(report)) = joined {
            println!("{report}");
            reports.push(report);
        }
    }

    info!("scan finished: {} terminals found", reports.len());
    Ok(reports)
}

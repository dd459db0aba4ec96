// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use std::time::Duration;

use anyhow::Result;

use crate::{
    cfg::config::{Config, ConfigError},
    client::discovery,
};

/// Sweeps `target` for terminals with the command-line overrides applied.
pub async fn scan_terminals(
    cfg: &Config,
    target: &str,
    timeout: f64,
    workers: usize,
) -> Result<()> {
    let mut scan_cfg = cfg.scan_config();
    scan_cfg.timeout =
        Duration::try_from_secs_f64(timeout).map_err(|_| ConfigError::InvalidTimeout(timeout))?;
    scan_cfg.max_workers = workers;

    discovery::scan_terminals(&scan_cfg, target).await?;
    Ok(())
}

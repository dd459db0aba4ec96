// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use anyhow::{Context, Result};
use clap::Parser;
use dknw_client_rs::{
    cfg::{
        cli::{Cli, Commands, resolve_config_path},
        config::Config,
        logger::init_logger,
    },
    handlers::{scan, search, transfer, transfer::Target},
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => resolve_config_path(path)
            .and_then(Config::load_from_file)
            .context("failed to resolve or load config")?,
        None => Config::default(),
    };
    let _logger = init_logger(&cfg.logger)?;

    match cli.command {
        Commands::ScanTerminals {
            target,
            timeout,
            workers,
        } => {
            scan::scan_terminals(&cfg, &target, timeout, workers).await?;
        },
        Commands::SearchDirs {
            host,
            port,
            protocol,
            dest,
        } => {
            let target = Target::new(host, port, &protocol);
            search::search_dirs(&cfg, &target, dest.as_deref()).await?;
        },
        Commands::DownloadFile {
            host,
            port,
            dir,
            file,
            dest,
            protocol,
        } => {
            let target = Target::new(host, port, &protocol);
            let n = transfer::download_file(&cfg, &target, dir, file, &dest).await?;
            info!("downloaded {n} bytes to {}", dest.display());
        },
        Commands::UploadFile {
            host,
            port,
            src,
            dir,
            file,
            protocol,
        } => {
            let target = Target::new(host, port, &protocol);
            let n = transfer::upload_file(&cfg, &target, &src, dir, file).await?;
            info!("uploaded {n} bytes from {}", src.display());
        },
    }

    Ok(())
}

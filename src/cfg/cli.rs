// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::cfg::enums::Protocol;

#[derive(Parser, Debug)]
#[command(name = "dknw-client-rs")]
#[command(about = "Client toolkit for DAM karaoke terminals", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Optional YAML config with logger and protocol defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sweep a network for DAM terminals.
    ScanTerminals {
        /// Target network in CIDR notation.
        target: String,

        /// Per-address timeout in seconds.
        #[arg(long, default_value_t = 5.0)]
        timeout: f64,

        /// Number of concurrent probes.
        #[arg(long, default_value_t = 255)]
        workers: usize,
    },

    /// Probe every directory number of a terminal for files.
    SearchDirs {
        /// Terminal address.
        host: String,

        /// Terminal port (data port for ds2ftp).
        port: u16,

        #[command(flatten)]
        protocol: ProtocolArgs,

        /// Download found files to {dest}/{dir}.{file}.
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Download a file from a terminal.
    DownloadFile {
        /// Terminal address.
        host: String,

        /// Terminal port (data port for ds2ftp).
        port: u16,

        /// Directory number.
        dir: u32,

        /// File number.
        file: u32,

        /// Destination file path.
        dest: PathBuf,

        #[command(flatten)]
        protocol: ProtocolArgs,
    },

    /// Upload a file to a terminal.
    UploadFile {
        /// Terminal address.
        host: String,

        /// Terminal port (data port for ds2ftp).
        port: u16,

        /// Source file path.
        src: PathBuf,

        /// Directory number.
        dir: u32,

        /// File number.
        file: u32,

        #[command(flatten)]
        protocol: ProtocolArgs,
    },
}

/// Protocol selection shared by the transfer commands.
#[derive(clap::Args, Debug, Clone)]
pub struct ProtocolArgs {
    /// Transfer protocol.
    #[arg(long, value_enum, default_value_t)]
    pub protocol: Protocol,

    /// ds2ftp control port; defaults to the data port + 1.
    #[arg(long)]
    pub ctrl_port: Option<u16>,

    /// ds2ftp data port; defaults to the main port.
    #[arg(long)]
    pub data_port: Option<u16>,
}

/// Turns a possibly relative config path into a canonical absolute one.
pub fn resolve_config_path(rel: &Path) -> Result<PathBuf> {
    let abs = if rel.is_absolute() {
        rel.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(rel)
    };

    abs.canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))
}

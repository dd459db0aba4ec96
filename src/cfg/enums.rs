// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use core::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which transfer protocol a driver command talks.
#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    #[serde(rename = "sftp")]
    #[value(name = "sftp")]
    Sftp,
    #[serde(rename = "ds2ftp")]
    #[value(name = "ds2ftp")]
    Ds2Ftp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Sftp => "sftp",
            Protocol::Ds2Ftp => "ds2ftp",
        })
    }
}

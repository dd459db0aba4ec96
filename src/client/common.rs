// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use std::time::Duration;

use anyhow::{Result, anyhow};
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Marker error for an elapsed I/O deadline. The DS2FTP pumps downcast to
/// this to tell a benign end-of-transfer silence from a real failure.
#[derive(Debug, Error)]
#[error("{0} timeout")]
pub struct IoTimeout(pub &'static str);

pub(super) async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!("{label} cancelled")),
        res = timeout(io_timeout, fut) => {
            match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(IoTimeout(label).into()),
            }
        }
    }
}

/// True when the error chain bottoms out in an elapsed deadline.
pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.downcast_ref::<IoTimeout>().is_some()
}

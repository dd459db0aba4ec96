// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use std::{io::SeekFrom, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::common::{io_with_timeout, is_timeout},
    models::ds2ftp::{
        CmdType, Command, Cts, DS2_MAGIC, ErrorCode, FileMode, make_cts, make_errorcts, make_rts,
    },
};

/// Mid-transfer wait for the next CTS.
const CTS_TIMEOUT: Duration = Duration::from_secs(3);
/// Per-byte wait for the tail of an ERRORCTS message.
const ERRORCTS_BYTE_TIMEOUT: Duration = Duration::from_secs(1);
/// Ceiling applied to the data-channel timeout once a chunk has started
/// arriving.
const PARTIAL_READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct Ds2FtpConfig {
    pub host: String,
    pub ctrl_port: u16,
    pub data_port: u16,
    pub timeout: Duration,
    /// Block size the terminals usually grant; the server's CTS still
    /// decides the actual chunking.
    pub chunk_size: usize,
}

impl Ds2FtpConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ctrl_port: 23105, // 0x59c1
            data_port: 23104, // 0x59c0
            timeout: Duration::from_secs(5),
            chunk_size: 0x3C8C0,
        }
    }
}

/// One of the two DS2FTP TCP connections.
#[derive(Debug)]
struct Channel {
    name: &'static str,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl Channel {
    async fn connect(
        name: &'static str,
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .with_context(|| format!("{name} channel connection timeout to {host}:{port}"))?
            .with_context(|| format!("failed to connect to {name} channel at {host}:{port}"))?;
        stream.set_nodelay(true)?;
        debug!("{name} channel connection established to {host}:{port}");

        let (r, w) = stream.into_split();
        Ok(Self {
            name,
            reader: Mutex::new(r),
            writer: Mutex::new(w),
        })
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        let mut w = self.writer.lock().await;
        w.write_all(data)
            .await
            .with_context(|| format!("failed to send data on {} channel", self.name))?;
        debug!("sent {} bytes on {} channel", data.len(), self.name);
        Ok(())
    }

    async fn shutdown(&self) {
        let mut w = self.writer.lock().await;
        let _ = w.shutdown().await;
        debug!("{} channel closed", self.name);
    }
}

/// Flow-controlled dual-channel client: commands on the control connection,
/// bulk bytes on the data connection.
///
/// The transfer lock covers a whole download or upload; the two channels
/// are interleaved and a second concurrent caller would corrupt the
/// exchange.
#[derive(Debug)]
pub struct Ds2FtpClient {
    ctrl: Channel,
    data: Channel,
    xfer: Mutex<()>,
    cfg: Ds2FtpConfig,
    cancel: CancellationToken,
}

impl Ds2FtpClient {
    /// Opens the control connection, then the data connection. If the data
    /// connection fails the control connection is closed before the error
    /// propagates.
    pub async fn connect(cfg: &Ds2FtpConfig) -> Result<Self> {
        info!(
            "connecting to terminal {} (ctrl {}, data {})",
            cfg.host, cfg.ctrl_port, cfg.data_port
        );
        let ctrl = Channel::connect("control", &cfg.host, cfg.ctrl_port, cfg.timeout).await?;
        let data = match Channel::connect("data", &cfg.host, cfg.data_port, cfg.timeout).await {
            Ok(data) => data,
            Err(e) => {
                ctrl.shutdown().await;
                return Err(e);
            },
        };

        Ok(Self {
            ctrl,
            data,
            xfer: Mutex::new(()),
            cfg: cfg.clone(),
            cancel: CancellationToken::new(),
        })
    }

    /// Closes both connections.
    pub async fn disconnect(self) {
        info!("disconnecting from terminal");
        self.data.shutdown().await;
        self.ctrl.shutdown().await;
    }

    /// Aborts any pending channel I/O; the unwinding transfer releases the
    /// lock and its counters on the way out.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Receives one framed command from the control channel: scans for the
    /// `"DS2\0"` magic (discarding noise in front of it), reads the opcode
    /// and the fixed body, and for ERRORCTS collects the message byte by
    /// byte until a newline or a one-second silence.
    async fn ctrl_receive(&self, receive_timeout: Duration) -> Result<Command> {
        let mut r = self.ctrl.reader.lock().await;

        let mut window = [0u8; 4];
        io_with_timeout(
            "control receive",
            r.read_exact(&mut window),
            receive_timeout,
            &self.cancel,
        )
        .await?;
        while window != DS2_MAGIC {
            window.rotate_left(1);
            io_with_timeout(
                "control receive",
                r.read_exact(&mut window[3..]),
                receive_timeout,
                &self.cancel,
            )
            .await?;
        }

        let mut opcode = [0u8; 4];
        io_with_timeout(
            "control receive",
            r.read_exact(&mut opcode),
            receive_timeout,
            &self.cancel,
        )
        .await?;
        let raw_opcode = u32::from_be_bytes(opcode);
        let cmd = CmdType::from_u32(raw_opcode)
            .with_context(|| format!("unknown command type on control channel: 0x{raw_opcode:08x}"))?;

        let mut frame = Vec::with_capacity(cmd.frame_len() + 64);
        frame.extend_from_slice(&window);
        frame.extend_from_slice(&opcode);
        let body_start = frame.len();
        frame.resize(cmd.frame_len(), 0);
        io_with_timeout(
            "control receive",
            r.read_exact(&mut frame[body_start..]),
            receive_timeout,
            &self.cancel,
        )
        .await?;

        if cmd == CmdType::ErrorCts {
            loop {
                let mut byte = [0u8; 1];
                match io_with_timeout(
                    "error message receive",
                    r.read(&mut byte),
                    ERRORCTS_BYTE_TIMEOUT,
                    &self.cancel,
                )
                .await
                {
                    Ok(0) => break,
                    Ok(_) if byte[0] == b'\n' => break,
                    Ok(_) => frame.push(byte[0]),
                    Err(e) if is_timeout(&e) => break,
                    Err(e) => return Err(e),
                }
            }
        }
        drop(r);

        let command = Command::parse(&frame)?;
        debug!("received {:?} on control channel", command.cmd_type());
        Ok(command)
    }

    /// Reads exactly `size` bytes from the data channel, tolerating partial
    /// chunks: once bytes have started arriving the per-read timeout drops
    /// to two seconds, and a timeout with data in hand yields the partial
    /// chunk instead of an error.
    async fn data_receive(&self, size: usize, receive_timeout: Duration) -> Result<Vec<u8>> {
        let mut r = self.data.reader.lock().await;

        let mut received = vec![0u8; size];
        let mut filled = 0usize;
        let mut timeout_val = receive_timeout;

        while filled < size {
            match io_with_timeout(
                "data receive",
                r.read(&mut received[filled..]),
                timeout_val,
                &self.cancel,
            )
            .await
            {
                Ok(0) => {
                    if filled == 0 {
                        bail!("data channel closed by server");
                    }
                    break;
                },
                Ok(n) => {
                    filled += n;
                    debug!("received chunk of {n} bytes, {} remaining", size - filled);
                    timeout_val = timeout_val.min(PARTIAL_READ_TIMEOUT);
                },
                Err(e) if is_timeout(&e) && filled > 0 => {
                    warn!("partial data received ({filled}/{size} bytes) before timeout");
                    break;
                },
                Err(e) => return Err(e),
            }
        }

        received.truncate(filled);
        Ok(received)
    }

    async fn send_cts(&self, tsize: u32, fsize: u32, bsize: u32) -> Result<()> {
        debug!("sending CTS: tsize={tsize} fsize={fsize} bsize={bsize}");
        self.ctrl.send(&make_cts(tsize, fsize, bsize)).await
    }

    /// Reports a client-side failure to the terminal; the code rides in the
    /// CTS block-size slot.
    pub async fn send_error_cts(&self, code: ErrorCode, message: &str) -> Result<()> {
        self.ctrl
            .send(&make_errorcts(0, 0, code as u32, message))
            .await
    }

    /// Downloads `(dir, file)` into `dest`. Returns the final transfer
    /// position; an ERRORCTS mid-transfer ends the pump with the bytes
    /// moved so far.
    pub async fn download_file(&self, dir: u32, file: u32, dest: &Path) -> Result<u64> {
        let _guard = self.xfer.lock().await;
        debug!("starting download ({:?}): dir {dir}, file {file}", FileMode::Get);

        self.ctrl.send(&make_rts(dir, file, 0, 0)).await?;

        debug!("waiting for initial CTS");
        let mut cts = self.expect_initial_cts().await?;
        if cts.tsize < 1 {
            bail!("file empty");
        }
        let total = u64::from(cts.tsize);
        let mut done = u64::from(cts.fsize);

        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut dest_file = File::create(dest)
            .await
            .with_context(|| format!("failed to open {}", dest.display()))?;

        // Acknowledge with the same values the server sent.
        self.send_cts(cts.tsize, cts.fsize, cts.bsize).await?;

        while done < total {
            let chunk = self
                .data_receive(cts.bsize as usize, self.cfg.timeout)
                .await?;
            if chunk.is_empty() {
                error!("failed to receive data chunk");
                break;
            }
            dest_file.write_all(&chunk).await?;
            let chunk_len = chunk.len() as u64;
            done += chunk_len;
            debug!("received data chunk: {chunk_len} bytes ({done}/{total})");

            if done >= total {
                break;
            }

            match self.ctrl_receive(CTS_TIMEOUT).await {
                Ok(Command::Cts(next)) => {
                    debug!("received next CTS: {next}");
                    cts = next;
                    if next.fsize >= next.tsize {
                        debug!("download complete as indicated by server CTS");
                        break;
                    }
                    self.send_cts(next.tsize, next.fsize, next.bsize).await?;
                },
                Ok(Command::ErrorCts(err)) => {
                    error!("received ERRORCTS: {}", err.message);
                    break;
                },
                Ok(other) => {
                    error!("unexpected response type: {:?}", other.cmd_type());
                    break;
                },
                // A server may fall silent after handing over the last
                // chunk instead of sending a final CTS.
                Err(e) if is_timeout(&e) && done >= total.saturating_sub(chunk_len) => {
                    debug!("expected timeout after all data received");
                    break;
                },
                Err(e) => return Err(e),
            }
        }
        dest_file.flush().await?;

        info!("download completed: {} ({done} bytes)", dest.display());
        Ok(done)
    }

    /// Uploads `src` as `(dir, file)`. The initial CTS carries the server's
    /// idea of total and already-transferred sizes, which lets it resume an
    /// interrupted upload.
    pub async fn upload_file(&self, src: &Path, dir: u32, file: u32) -> Result<u64> {
        let file_size = tokio::fs::metadata(src)
            .await
            .with_context(|| format!("failed to stat {}", src.display()))?
            .len();
        let wire_size =
            u32::try_from(file_size).with_context(|| format!("{} too large", src.display()))?;

        let _guard = self.xfer.lock().await;
        debug!(
            "starting upload ({:?}): {} ({file_size} bytes)",
            FileMode::Put,
            src.display()
        );

        self.ctrl.send(&make_rts(dir, file, wire_size, 0)).await?;

        debug!("waiting for initial CTS");
        let mut cts = self.expect_initial_cts().await?;
        let total = u64::from(cts.tsize);
        let mut done = u64::from(cts.fsize);

        let mut src_file = File::open(src)
            .await
            .with_context(|| format!("failed to open {}", src.display()))?;

        while done < total {
            let bsize = cts.bsize as usize;
            src_file.seek(SeekFrom::Start(done)).await?;
            let mut chunk = vec![0u8; bsize];
            let mut filled = 0usize;
            while filled < bsize {
                let n = src_file.read(&mut chunk[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                warn!("end of file reached unexpectedly");
                break;
            }

            self.data.send(&chunk[..filled]).await?;
            done += filled as u64;
            debug!("sent data chunk: {filled} bytes ({done}/{total})");

            if done >= total {
                break;
            }

            match self.ctrl_receive(CTS_TIMEOUT).await {
                Ok(Command::Cts(next)) => {
                    debug!("received next CTS: {next}");
                    cts = next;
                    if next.fsize >= next.tsize {
                        debug!("upload complete as indicated by server CTS");
                        break;
                    }
                },
                Ok(Command::ErrorCts(err)) => {
                    error!("received ERRORCTS: {}", err.message);
                    break;
                },
                Ok(other) => {
                    error!("unexpected response type: {:?}", other.cmd_type());
                    break;
                },
                Err(e) if is_timeout(&e) && done >= total.saturating_sub(filled as u64) => {
                    debug!("expected timeout after all data sent");
                    break;
                },
                Err(e) => return Err(e),
            }
        }

        info!("upload completed: {done} bytes");
        Ok(done)
    }

    /// Existence probe: a download into a throwaway path. The file exists
    /// iff any bytes came back; the temporary file is removed before
    /// returning.
    pub async fn exists_file(&self, dir: u32, file: u32) -> bool {
        debug!("checking file existence: dir {dir}, file {file}");
        let tmp = match tempfile::Builder::new()
            .prefix("dknw-exists-")
            .tempfile()
        {
            Ok(tmp) => tmp,
            Err(e) => {
                warn!("failed to create temporary file: {e}");
                return false;
            },
        };
        match self.download_file(dir, file, tmp.path()).await {
            Ok(n) => n > 0,
            Err(e) => {
                debug!("existence check failed: {e:#}");
                false
            },
        }
    }

    async fn expect_initial_cts(&self) -> Result<Cts> {
        match self.ctrl_receive(self.cfg.timeout).await? {
            Command::Cts(cts) => {
                debug!("received initial CTS: {cts}");
                Ok(cts)
            },
            Command::ErrorCts(err) => bail!("terminal rejected transfer: {}", err.message),
            other => bail!("unexpected initial response type: {:?}", other.cmd_type()),
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use std::{path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
    time::timeout,
};
use tracing::{debug, error, info};

use crate::{
    models::{
        apdu::{Apdu, ApduItem, ApduItemType, ApduType, FileOperation},
        nsdu::{NetworkType, Nsdu},
    },
    unicrypt::Unicrypt,
};

/// Identification the client presents in A_CONNECT.
const SYSTEM_ID: &[u8] = b"DKNW10";
const PROTOCOL_ID: &[u8] = b"SFTP11";
const CLIENT_SIDE: &[u8] = &[0x00, 0x00];
const JOB_ID: &[u8] = &[0x01, 0x10];

/// Upload block size. The last block may be smaller.
const DATA_CHUNK_SIZE: usize = 0xFF8;

#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    /// Applies to the initial TCP connect only; bulk transfers rely on the
    /// peer's liveness.
    pub timeout: Duration,
    pub network: NetworkType,
}

impl SftpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(5),
            network: NetworkType::Bb,
        }
    }
}

/// A connected, authenticated SFTP association with one terminal.
///
/// One TCP connection split into owned halves. The exchange lock makes each
/// request + immediate response pair atomic; the download receive loop runs
/// outside it because only the server sends during bulk data.
#[derive(Debug)]
pub struct SftpClient {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    xchg: Mutex<()>,
    network: NetworkType,
}

impl SftpClient {
    /// Establishes the TCP connection and runs the
    /// connect/authenticate handshake.
    pub async fn connect(cfg: &SftpConfig) -> Result<Self> {
        info!("connecting to terminal {}:{}", cfg.host, cfg.port);
        let stream = timeout(
            cfg.timeout,
            TcpStream::connect((cfg.host.as_str(), cfg.port)),
        )
        .await
        .with_context(|| format!("connection timeout to {}:{}", cfg.host, cfg.port))?
        .with_context(|| format!("failed to connect to {}:{}", cfg.host, cfg.port))?;
        stream.set_nodelay(true)?;

        let (r, w) = stream.into_split();
        let client = Self {
            reader: Mutex::new(r),
            writer: Mutex::new(w),
            xchg: Mutex::new(()),
            network: cfg.network,
        };

        client.authenticate().await?;
        info!("authentication successful, association established");
        Ok(client)
    }

    async fn authenticate(&self) -> Result<()> {
        debug!("sending A_CONNECT");
        let response = self
            .send_and_receive(&Apdu::generic(ApduType::AConnect, vec![
                ApduItem::new(ApduItemType::SystemId, SYSTEM_ID),
                ApduItem::new(ApduItemType::ProtocolId, PROTOCOL_ID),
                ApduItem::new(ApduItemType::ClientSide, CLIENT_SIDE),
                ApduItem::new(ApduItemType::JobId, JOB_ID),
            ]))
            .await?;
        if response.apdu_type() != ApduType::AAuthent {
            bail!("A_AUTHENT not responded, got {:?}", response.apdu_type());
        }

        let challenge = response
            .get_item(ApduItemType::AuthReq)
            .context("A_AUTHENT carries no challenge")?;
        debug!("challenge: {}", hex::encode(challenge));
        let auth_response = Unicrypt::new().encrypt(challenge);

        debug!("sending A_AUTHENT_RSP");
        let response = self
            .send_and_receive(&Apdu::generic(ApduType::AAuthentRsp, vec![
                ApduItem::new(ApduItemType::AuthRes, auth_response),
            ]))
            .await?;
        if response.apdu_type() != ApduType::AAccept {
            bail!("A_ACCEPT not responded, got {:?}", response.apdu_type());
        }
        Ok(())
    }

    /// Releases the association and closes the connection. The connection
    /// is torn down whether or not the peer answers the release.
    pub async fn disconnect(self) -> Result<()> {
        info!("disconnecting from terminal");
        let result = self
            .send_and_receive(&Apdu::generic(ApduType::ARelease, vec![]))
            .await
            .and_then(|response| {
                if response.apdu_type() != ApduType::ASync {
                    bail!("A_SYNC not responded, got {:?}", response.apdu_type());
                }
                Ok(())
            });

        let mut w = self.writer.lock().await;
        let _ = w.shutdown().await; // dropping the halves closes the socket
        result
    }

    async fn send(&self, apdu: &Apdu) -> Result<()> {
        let nsdu = Nsdu::new(apdu.clone(), self.network);
        let frame = nsdu.to_bytes()?;
        let mut w = self.writer.lock().await;
        w.write_all(&frame).await.context("failed to send data")?;
        debug!("sent APDU: {:?} ({} bytes)", apdu.apdu_type(), frame.len());
        Ok(())
    }

    async fn receive(&self) -> Result<Apdu> {
        let mut r = self.reader.lock().await;

        let mut frame = vec![0u8; 3];
        r.read_exact(&mut frame[..3])
            .await
            .context("failed to read frame header")?;
        let apdu_len = u16::from_be_bytes([frame[1], frame[2]]) as usize;

        // APDU body, CRC trailer on NB, ETX.
        let tail_len = apdu_len + if self.network == NetworkType::Nb { 3 } else { 1 };
        let offset = frame.len();
        frame.resize(offset + tail_len, 0);
        r.read_exact(&mut frame[offset..])
            .await
            .context("failed to read frame body")?;
        drop(r);

        let nsdu = Nsdu::parse(&frame, self.network)?;
        match &nsdu.apdu {
            Apdu::Generic { apdu_type, .. } => debug!("received APDU: {apdu_type:?}"),
            Apdu::FData { data } => debug!("received F_DATA: {} bytes", data.len()),
        }
        Ok(nsdu.apdu)
    }

    /// One request/response exchange under the lock.
    async fn send_and_receive(&self, apdu: &Apdu) -> Result<Apdu> {
        let _guard = self.xchg.lock().await;
        self.send(apdu).await?;
        self.receive().await
    }

    /// Downloads `(dir, file)` into `dest`. Returns the bytes written.
    pub async fn download_file(&self, dir: u16, file: u32, dest: &Path) -> Result<u64> {
        info!("starting download: dir {dir}, file {file}");
        let response = self
            .send_and_receive(&Apdu::generic(ApduType::FStart, vec![
                ApduItem::new(
                    ApduItemType::FileOperation,
                    (FileOperation::Read as u16).to_be_bytes().to_vec(),
                ),
                ApduItem::new(ApduItemType::FileNumber, file_number(dir, file)),
            ]))
            .await?;
        if response.apdu_type() != ApduType::FReady {
            bail!("F_READY not responded, got {:?}", response.apdu_type());
        }

        let expected_size = response
            .get_item(ApduItemType::ExpectFileSize)
            .and_then(item_u32);
        if let Some(size) = expected_size {
            info!("expected file size: {size} bytes");
        }

        let mut dest_file = File::create(dest)
            .await
            .with_context(|| format!("failed to open {}", dest.display()))?;

        let mut downloaded: u64 = 0;
        loop {
            match self.receive().await? {
                Apdu::FData { data } => {
                    downloaded += data.len() as u64;
                    dest_file.write_all(&data).await?;
                    match expected_size {
                        Some(total) => {
                            debug!("received chunk: {} bytes ({downloaded}/{total})", data.len());
                        },
                        None => debug!("received chunk: {} bytes ({downloaded})", data.len()),
                    }
                },
                apdu if apdu.apdu_type() == ApduType::FFinal => break,
                apdu => {
                    error!("unexpected APDU received: {:?}", apdu.apdu_type());
                    bail!("unexpected APDU received: {:?}", apdu.apdu_type());
                },
            }
        }
        dest_file.flush().await?;

        debug!("sending F_END");
        self.send(&Apdu::generic(ApduType::FEnd, vec![])).await?;

        info!("download completed: {} ({downloaded} bytes)", dest.display());
        Ok(downloaded)
    }

    /// Uploads `src` as `(dir, file)`, replacing any existing file.
    /// Returns the bytes sent.
    pub async fn upload_file(&self, src: &Path, dir: u16, file: u32) -> Result<u64> {
        let file_size = tokio::fs::metadata(src)
            .await
            .with_context(|| format!("failed to stat {}", src.display()))?
            .len();
        let wire_size =
            u32::try_from(file_size).with_context(|| format!("{} too large", src.display()))?;
        info!("starting upload: {} ({file_size} bytes)", src.display());

        let response = self
            .send_and_receive(&Apdu::generic(ApduType::FStart, vec![
                ApduItem::new(
                    ApduItemType::FileOperation,
                    (FileOperation::Replace as u16).to_be_bytes().to_vec(),
                ),
                ApduItem::new(ApduItemType::FileNumber, file_number(dir, file)),
                ApduItem::new(
                    ApduItemType::ExpectFileSize,
                    wire_size.to_be_bytes().to_vec(),
                ),
            ]))
            .await?;
        if response.apdu_type() != ApduType::FReady {
            bail!("F_READY not responded, got {:?}", response.apdu_type());
        }
        let acked = response
            .get_item(ApduItemType::ExpectFileSize)
            .and_then(item_u32)
            .context("F_READY carries no EXPECT_FILE_SIZE")?;
        if acked != wire_size {
            bail!("EXPECT_FILE_SIZE mismatch: sent {wire_size}, acknowledged {acked}");
        }

        let mut src_file = File::open(src)
            .await
            .with_context(|| format!("failed to open {}", src.display()))?;
        let mut uploaded: u64 = 0;
        let mut chunk = vec![0u8; DATA_CHUNK_SIZE];
        loop {
            let mut filled = 0;
            while filled < DATA_CHUNK_SIZE {
                let n = src_file.read(&mut chunk[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            uploaded += filled as u64;
            debug!("sending chunk: {filled} bytes ({uploaded}/{file_size})");
            self.send(&Apdu::f_data(Bytes::copy_from_slice(&chunk[..filled])))
                .await?;
        }

        debug!("sending F_FINAL");
        let response = self
            .send_and_receive(&Apdu::generic(ApduType::FFinal, vec![]))
            .await?;
        if response.apdu_type() != ApduType::FEnd {
            bail!("F_END not responded, got {:?}", response.apdu_type());
        }

        info!("upload completed: {uploaded} bytes");
        Ok(uploaded)
    }
}

/// `FILE_NUMBER` item payload: `u16 dir ‖ u32 file`.
fn file_number(dir: u16, file: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&dir.to_be_bytes());
    out.extend_from_slice(&file.to_be_bytes());
    out
}

fn item_u32(data: &[u8]) -> Option<u32> {
    data.try_into().ok().map(u32::from_be_bytes)
}

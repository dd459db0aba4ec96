// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use dknw_client_rs::{
    client::ds2ftp::{Ds2FtpClient, Ds2FtpConfig},
    models::ds2ftp::{CTS_LEN, Command, RTS_LEN, make_cts, make_errorcts},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

struct MockPorts {
    ctrl: TcpListener,
    data: TcpListener,
    cfg: Ds2FtpConfig,
}

async fn bind_mock() -> Result<MockPorts> {
    let ctrl = TcpListener::bind("127.0.0.1:0").await?;
    let data = TcpListener::bind("127.0.0.1:0").await?;
    let cfg = Ds2FtpConfig {
        host: "127.0.0.1".to_string(),
        ctrl_port: ctrl.local_addr()?.port(),
        data_port: data.local_addr()?.port(),
        timeout: Duration::from_secs(5),
        chunk_size: 0x3C8C0,
    };
    Ok(MockPorts { ctrl, data, cfg })
}

async fn accept_both(mock: &MockPorts) -> Result<(TcpStream, TcpStream)> {
    let (ctrl, _) = mock.ctrl.accept().await?;
    let (data, _) = mock.data.accept().await?;
    Ok((ctrl, data))
}

async fn read_rts(ctrl: &mut TcpStream) -> Result<dknw_client_rs::models::ds2ftp::Rts> {
    let mut frame = [0u8; RTS_LEN];
    ctrl.read_exact(&mut frame).await?;
    match Command::parse(&frame)? {
        Command::Rts(rts) => Ok(rts),
        other => bail!("expected RTS, got {:?}", other.cmd_type()),
    }
}

async fn expect_cts_echo(ctrl: &mut TcpStream, tsize: u32, fsize: u32, bsize: u32) -> Result<()> {
    let mut frame = [0u8; CTS_LEN];
    ctrl.read_exact(&mut frame).await?;
    ensure!(
        frame.as_slice() == make_cts(tsize, fsize, bsize),
        "unexpected CTS echo"
    );
    Ok(())
}

#[tokio::test]
async fn test_download_pump() -> Result<()> {
    let mock = bind_mock().await?;
    let cfg = mock.cfg.clone();

    let server = tokio::spawn(async move {
        let (mut ctrl, mut data) = accept_both(&mock).await?;

        let rts = read_rts(&mut ctrl).await?;
        ensure!(rts.dir == 1 && rts.file == 1 && rts.filesize == 0);

        ctrl.write_all(&make_cts(10, 0, 4)).await?;
        expect_cts_echo(&mut ctrl, 10, 0, 4).await?;

        data.write_all(&[0, 1, 2, 3]).await?;
        ctrl.write_all(&make_cts(10, 4, 4)).await?;
        expect_cts_echo(&mut ctrl, 10, 4, 4).await?;

        data.write_all(&[4, 5, 6, 7]).await?;
        ctrl.write_all(&make_cts(10, 8, 2)).await?;
        expect_cts_echo(&mut ctrl, 10, 8, 2).await?;

        data.write_all(&[8, 9]).await?;
        Ok(())
    });

    let client = Ds2FtpClient::connect(&cfg).await?;
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("out.bin");

    let n = client.download_file(1, 1, &dest).await?;
    assert_eq!(n, 10);
    assert_eq!(
        tokio::fs::read(&dest).await?,
        (0u8..10).collect::<Vec<_>>()
    );

    client.disconnect().await;
    server.await?.context("mock terminal failed")
}

#[tokio::test]
async fn test_upload_pump() -> Result<()> {
    let mock = bind_mock().await?;
    let cfg = mock.cfg.clone();
    let payload: Vec<u8> = (0u8..10).collect();
    let expected = payload.clone();

    let server = tokio::spawn(async move {
        let (mut ctrl, mut data) = accept_both(&mock).await?;

        let rts = read_rts(&mut ctrl).await?;
        ensure!(rts.dir == 5 && rts.file == 100 && rts.filesize == 10);

        let mut received = Vec::new();
        let mut chunk = [0u8; 4];

        ctrl.write_all(&make_cts(10, 0, 4)).await?;
        data.read_exact(&mut chunk).await?;
        received.extend_from_slice(&chunk);

        ctrl.write_all(&make_cts(10, 4, 4)).await?;
        data.read_exact(&mut chunk).await?;
        received.extend_from_slice(&chunk);

        ctrl.write_all(&make_cts(10, 8, 2)).await?;
        data.read_exact(&mut chunk[..2]).await?;
        received.extend_from_slice(&chunk[..2]);

        ensure!(received == expected, "payload mangled in transit");
        Ok(())
    });

    let src_dir = tempfile::tempdir()?;
    let src = src_dir.path().join("in.bin");
    tokio::fs::write(&src, &payload).await?;

    let client = Ds2FtpClient::connect(&cfg).await?;
    let n = client.upload_file(&src, 5, 100).await?;
    assert_eq!(n, 10);

    client.disconnect().await;
    server.await?.context("mock terminal failed")
}

#[tokio::test]
async fn test_download_stops_on_errorcts() -> Result<()> {
    let mock = bind_mock().await?;
    let cfg = mock.cfg.clone();

    let server = tokio::spawn(async move {
        let (mut ctrl, mut data) = accept_both(&mock).await?;

        let _rts = read_rts(&mut ctrl).await?;
        ctrl.write_all(&make_cts(10, 0, 4)).await?;
        expect_cts_echo(&mut ctrl, 10, 0, 4).await?;

        data.write_all(&[0, 1, 2, 3]).await?;
        ctrl.write_all(&make_errorcts(0, 0, 2, "disk failure")).await?;
        Ok::<(), anyhow::Error>(())
    });

    let client = Ds2FtpClient::connect(&cfg).await?;
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("out.bin");

    // The pump ends on the error and reports the bytes moved so far.
    let n = client.download_file(1, 2, &dest).await?;
    assert_eq!(n, 4);
    assert_eq!(tokio::fs::read(&dest).await?, vec![0, 1, 2, 3]);

    client.disconnect().await;
    server.await?.context("mock terminal failed")
}

#[tokio::test]
async fn test_empty_file_fails_download() -> Result<()> {
    let mock = bind_mock().await?;
    let cfg = mock.cfg.clone();

    let server = tokio::spawn(async move {
        let (mut ctrl, _data) = accept_both(&mock).await?;
        let _rts = read_rts(&mut ctrl).await?;
        ctrl.write_all(&make_cts(0, 0, 0)).await?;
        Ok::<_, anyhow::Error>(())
    });

    let client = Ds2FtpClient::connect(&cfg).await?;
    let dir = tempfile::tempdir()?;
    let err = client
        .download_file(1, 3, &dir.path().join("out.bin"))
        .await
        .expect_err("tsize < 1 must fail");
    assert!(err.to_string().contains("file empty"));

    client.disconnect().await;
    server.await?.context("mock terminal failed")
}

#[tokio::test]
async fn test_exists_file() -> Result<()> {
    let mock = bind_mock().await?;
    let cfg = mock.cfg.clone();

    let server = tokio::spawn(async move {
        let (mut ctrl, mut data) = accept_both(&mock).await?;

        // First probe: a 2-byte file.
        let rts = read_rts(&mut ctrl).await?;
        ensure!(rts.file == 100);
        ctrl.write_all(&make_cts(2, 0, 2)).await?;
        expect_cts_echo(&mut ctrl, 2, 0, 2).await?;
        data.write_all(&[0xAB, 0xCD]).await?;

        // Second probe: nothing there.
        let rts = read_rts(&mut ctrl).await?;
        ensure!(rts.file == 101);
        ctrl.write_all(&make_cts(0, 0, 0)).await?;
        Ok(())
    });

    let client = Ds2FtpClient::connect(&cfg).await?;
    assert!(client.exists_file(1, 100).await);
    assert!(!client.exists_file(1, 101).await);

    client.disconnect().await;
    server.await?.context("mock terminal failed")
}

#[tokio::test]
async fn test_data_connect_failure_closes_control() -> Result<()> {
    // Only the control listener exists; the data connect must fail and the
    // control socket must be released.
    let ctrl = TcpListener::bind("127.0.0.1:0").await?;
    let data_port = {
        // Grab a port and release it so nothing listens there.
        let probe = TcpListener::bind("127.0.0.1:0").await?;
        probe.local_addr()?.port()
    };
    let cfg = Ds2FtpConfig {
        host: "127.0.0.1".to_string(),
        ctrl_port: ctrl.local_addr()?.port(),
        data_port,
        timeout: Duration::from_millis(500),
        chunk_size: 0x3C8C0,
    };

    let server = tokio::spawn(async move {
        let (mut stream, _) = ctrl.accept().await?;
        // The client closing control surfaces as EOF here.
        let mut buf = [0u8; 1];
        let n = stream.read(&mut buf).await?;
        ensure!(n == 0, "control channel not closed");
        Ok::<_, anyhow::Error>(())
    });

    Ds2FtpClient::connect(&cfg)
        .await
        .expect_err("data connect must fail");

    server.await?.context("mock terminal failed")
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

use std::time::Duration;

use anyhow::{Context, Result, ensure};
use dknw_client_rs::{
    client::sftp::{SftpClient, SftpConfig},
    models::{
        apdu::{Apdu, ApduItem, ApduItemType, ApduType},
        nsdu::NetworkType,
    },
};
use hex_literal::hex;
use tokio::net::TcpListener;

use crate::integration_tests::common::{read_apdu, sftp_handshake, sftp_release, write_apdu};

const CHALLENGE: [u8; 8] = hex!("0011223344556677");

fn config(port: u16, network: NetworkType) -> SftpConfig {
    SftpConfig {
        host: "127.0.0.1".to_string(),
        port,
        timeout: Duration::from_secs(5),
        network,
    }
}

async fn run_download(network: NetworkType) -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let server = tokio::spawn(async move {
        let (mut s, _) = listener.accept().await?;
        sftp_handshake(&mut s, network, &CHALLENGE).await?;

        let start = read_apdu(&mut s, network).await?;
        ensure!(start.apdu_type() == ApduType::FStart);
        ensure!(start.get_item(ApduItemType::FileOperation) == Some(hex!("0001").as_slice()));
        ensure!(
            start.get_item(ApduItemType::FileNumber) == Some(hex!("0001 00000001").as_slice())
        );

        write_apdu(
            &mut s,
            Apdu::generic(ApduType::FReady, vec![ApduItem::new(
                ApduItemType::ExpectFileSize,
                10u32.to_be_bytes().to_vec(),
            )]),
            network,
        )
        .await?;

        for chunk in [&[0u8, 1, 2, 3][..], &[4, 5, 6, 7], &[8, 9]] {
            write_apdu(&mut s, Apdu::f_data(chunk.to_vec()), network).await?;
        }
        write_apdu(&mut s, Apdu::generic(ApduType::FFinal, vec![]), network).await?;

        let end = read_apdu(&mut s, network).await?;
        ensure!(end.apdu_type() == ApduType::FEnd);

        sftp_release(&mut s, network).await
    });

    let client = SftpClient::connect(&config(port, network)).await?;
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("out.bin");

    let n = client.download_file(1, 1, &dest).await?;
    assert_eq!(n, 10);
    assert_eq!(
        tokio::fs::read(&dest).await?,
        (0u8..10).collect::<Vec<_>>()
    );

    client.disconnect().await?;
    server.await?.context("mock terminal failed")
}

#[tokio::test]
async fn test_download_bb() -> Result<()> {
    run_download(NetworkType::Bb).await
}

#[tokio::test]
async fn test_download_nb() -> Result<()> {
    // Same transfer with the CRC trailer on every frame.
    run_download(NetworkType::Nb).await
}

#[tokio::test]
async fn test_upload_chunking() -> Result<()> {
    const SIZE: usize = 0x2000;
    let network = NetworkType::Bb;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let server = tokio::spawn(async move {
        let (mut s, _) = listener.accept().await?;
        sftp_handshake(&mut s, network, &CHALLENGE).await?;

        let start = read_apdu(&mut s, network).await?;
        ensure!(start.apdu_type() == ApduType::FStart);
        ensure!(start.get_item(ApduItemType::FileOperation) == Some(hex!("0002").as_slice()));
        ensure!(
            start.get_item(ApduItemType::ExpectFileSize)
                == Some((SIZE as u32).to_be_bytes().as_slice())
        );

        write_apdu(
            &mut s,
            Apdu::generic(ApduType::FReady, vec![ApduItem::new(
                ApduItemType::ExpectFileSize,
                (SIZE as u32).to_be_bytes().to_vec(),
            )]),
            network,
        )
        .await?;

        let mut chunk_sizes = Vec::new();
        let mut received = Vec::new();
        loop {
            match read_apdu(&mut s, network).await? {
                Apdu::FData { data } => {
                    chunk_sizes.push(data.len());
                    received.extend_from_slice(&data);
                },
                apdu if apdu.apdu_type() == ApduType::FFinal => break,
                apdu => anyhow::bail!("unexpected APDU {:?}", apdu.apdu_type()),
            }
        }
        write_apdu(&mut s, Apdu::generic(ApduType::FEnd, vec![]), network).await?;

        sftp_release(&mut s, network).await?;
        Ok((chunk_sizes, received))
    });

    let src_dir = tempfile::tempdir()?;
    let src = src_dir.path().join("in.bin");
    let payload: Vec<u8> = (0..SIZE).map(|i| (i % 251) as u8).collect();
    tokio::fs::write(&src, &payload).await?;

    let client = SftpClient::connect(&config(port, network)).await?;
    let n = client.upload_file(&src, 2, 300).await?;
    assert_eq!(n, SIZE as u64);
    client.disconnect().await?;

    let (chunk_sizes, received) = server.await?.context("mock terminal failed")?;
    assert_eq!(chunk_sizes, vec![0xFF8, 0xFF8, 0x10]);
    assert_eq!(received, payload);
    Ok(())
}

#[tokio::test]
async fn test_upload_size_mismatch_fails() -> Result<()> {
    let network = NetworkType::Bb;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let server = tokio::spawn(async move {
        let (mut s, _) = listener.accept().await?;
        sftp_handshake(&mut s, network, &CHALLENGE).await?;

        let _start = read_apdu(&mut s, network).await?;
        // Acknowledge the wrong size.
        write_apdu(
            &mut s,
            Apdu::generic(ApduType::FReady, vec![ApduItem::new(
                ApduItemType::ExpectFileSize,
                999u32.to_be_bytes().to_vec(),
            )]),
            network,
        )
        .await
    });

    let src_dir = tempfile::tempdir()?;
    let src = src_dir.path().join("in.bin");
    tokio::fs::write(&src, vec![0u8; 100]).await?;

    let client = SftpClient::connect(&config(port, network)).await?;
    let err = client
        .upload_file(&src, 1, 1)
        .await
        .expect_err("mismatched size must fail the upload");
    assert!(err.to_string().contains("EXPECT_FILE_SIZE mismatch"));

    server.await?.context("mock terminal failed")
}

#[tokio::test]
async fn test_connect_rejected() -> Result<()> {
    let network = NetworkType::Bb;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let server = tokio::spawn(async move {
        let (mut s, _) = listener.accept().await?;
        let _connect = read_apdu(&mut s, network).await?;
        write_apdu(&mut s, Apdu::generic(ApduType::AReject, vec![]), network).await
    });

    let err = SftpClient::connect(&config(port, network))
        .await
        .expect_err("A_REJECT must fail the connect");
    assert!(err.to_string().contains("A_AUTHENT not responded"));

    server.await?.context("mock terminal failed")
}

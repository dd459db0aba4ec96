// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

//! SFTP Network Service Data Units: the on-wire envelope around one APDU.
//!
//! Framing is `STX (0x02) · u16 length · APDU · [u16 crc] · ETX (0x03)`.
//! The CRC trailer is present only on the NB network variant. The legacy
//! peers compute it as the low 16 bits of CRC-32/ISO-HDLC over the length
//! bytes concatenated with the APDU body; that quirk is load-bearing and
//! must not be replaced with a true CRC-16.

use crc::{CRC_32_ISO_HDLC, Crc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::apdu::{Apdu, ApduError};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Terminal network variant. NB framing appends the CRC trailer.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    #[default]
    #[serde(rename = "BB", alias = "bb")]
    Bb,
    #[serde(rename = "NB", alias = "nb")]
    Nb,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NsduError {
    #[error("invalid STX: 0x{0:02x}")]
    InvalidStx(u8),
    #[error("failed to read length")]
    ShortLength,
    #[error("failed to read APDU data: declared {declared}, got {got}")]
    ShortApdu { declared: usize, got: usize },
    #[error("failed to read CRC")]
    ShortCrc,
    #[error("CRC mismatch: expected 0x{expected:04x}, actual 0x{actual:04x}")]
    CrcMismatch { expected: u16, actual: u16 },
    #[error("invalid ETX: 0x{0:02x}")]
    InvalidEtx(u8),
    #[error(transparent)]
    Apdu(#[from] ApduError),
}

/// Low 16 bits of CRC-32 over `length ‖ apdu`, as the peer computes it.
pub fn frame_crc(length: u16, apdu: &[u8]) -> u16 {
    let mut digest = CRC32.digest();
    digest.update(&length.to_be_bytes());
    digest.update(apdu);
    (digest.finalize() & 0xFFFF) as u16
}

/// One APDU wrapped for a given network variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsdu {
    pub apdu: Apdu,
    pub network: NetworkType,
}

impl Nsdu {
    pub fn new(apdu: Apdu, network: NetworkType) -> Self {
        Self { apdu, network }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, NsduError> {
        let apdu_data = self.apdu.to_bytes()?;
        let apdu_len = apdu_data.len() as u16;

        let mut out = Vec::with_capacity(apdu_data.len() + 6);
        out.push(STX);
        out.extend_from_slice(&apdu_len.to_be_bytes());
        out.extend_from_slice(&apdu_data);
        if self.network == NetworkType::Nb {
            out.extend_from_slice(&frame_crc(apdu_len, &apdu_data).to_be_bytes());
        }
        out.push(ETX);
        Ok(out)
    }

    /// Parses a complete frame. The caller states which network variant it
    /// expects; on NB the CRC trailer is required and verified.
    pub fn parse(buf: &[u8], network: NetworkType) -> Result<Self, NsduError> {
        let (&stx, rest) = buf.split_first().ok_or(NsduError::InvalidStx(0))?;
        if stx != STX {
            return Err(NsduError::InvalidStx(stx));
        }
        if rest.len() < 2 {
            return Err(NsduError::ShortLength);
        }
        let apdu_len = u16::from_be_bytes([rest[0], rest[1]]);
        let rest = &rest[2..];
        if rest.len() < apdu_len as usize {
            return Err(NsduError::ShortApdu {
                declared: apdu_len as usize,
                got: rest.len(),
            });
        }
        let (apdu_data, mut rest) = rest.split_at(apdu_len as usize);

        if network == NetworkType::Nb {
            if rest.len() < 2 {
                return Err(NsduError::ShortCrc);
            }
            let expected = u16::from_be_bytes([rest[0], rest[1]]);
            let actual = frame_crc(apdu_len, apdu_data);
            if expected != actual {
                return Err(NsduError::CrcMismatch { expected, actual });
            }
            rest = &rest[2..];
        }

        match rest.first() {
            Some(&ETX) => {},
            Some(&b) => return Err(NsduError::InvalidEtx(b)),
            None => return Err(NsduError::InvalidEtx(0)),
        }

        Ok(Self {
            apdu: Apdu::parse(apdu_data)?,
            network,
        })
    }
}

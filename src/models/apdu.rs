// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

//! SFTP Application Protocol Data Units.
//!
//! Every exchange with a terminal's SFTP service is one APDU inside an NSDU
//! envelope. On the wire an APDU is `u16 type · u16 length · payload`, all
//! big-endian. `F_DATA` carries an opaque payload; every other type carries
//! a sequence of type-length-value items that runs to the end of the
//! payload.

use bytes::Bytes;
use thiserror::Error;

/// APDU type codes. The `A_*` family manages the association, the `F_*`
/// family the file transfer.
#[repr(u16)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ApduType {
    #[default]
    AConnect = 0x0000,
    AAccept = 0x0001,
    AReject = 0x0002,
    ARelease = 0x0003,
    ASync = 0x0004,
    AAuthent = 0x0005,
    AAuthentRsp = 0x0006,

    FStart = 0x0100,
    FReady = 0x0101,
    FFinal = 0x0102,
    FEnd = 0x0103,
    FData = 0x0104,
    FCancel = 0x0105,
    FAlive = 0x0106,
    FPurge = 0x0107,
    FPurgeRsp = 0x0108,
    FSkip = 0x0109,
    FSkipRsp = 0x010A,

    None = 0xFFFF,
}

impl ApduType {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0x0000 => Self::AConnect,
            0x0001 => Self::AAccept,
            0x0002 => Self::AReject,
            0x0003 => Self::ARelease,
            0x0004 => Self::ASync,
            0x0005 => Self::AAuthent,
            0x0006 => Self::AAuthentRsp,
            0x0100 => Self::FStart,
            0x0101 => Self::FReady,
            0x0102 => Self::FFinal,
            0x0103 => Self::FEnd,
            0x0104 => Self::FData,
            0x0105 => Self::FCancel,
            0x0106 => Self::FAlive,
            0x0107 => Self::FPurge,
            0x0108 => Self::FPurgeRsp,
            0x0109 => Self::FSkip,
            0x010A => Self::FSkipRsp,
            0xFFFF => Self::None,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Item type codes nested inside structured APDUs.
///
/// Connection-scope items live in `0x00xx`, file-scope items in `0x01xx`,
/// mirroring the APDU type ranges.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApduItemType {
    SystemId = 0x0001,
    ProtocolId = 0x0002,
    ClientSide = 0x0003,
    JobId = 0x0004,
    AuthReq = 0x0005,
    AuthRes = 0x0006,

    FileOperation = 0x0101,
    FileNumber = 0x0102,
    ExpectFileSize = 0x0103,
}

impl ApduItemType {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0x0001 => Self::SystemId,
            0x0002 => Self::ProtocolId,
            0x0003 => Self::ClientSide,
            0x0004 => Self::JobId,
            0x0005 => Self::AuthReq,
            0x0006 => Self::AuthRes,
            0x0101 => Self::FileOperation,
            0x0102 => Self::FileNumber,
            0x0103 => Self::ExpectFileSize,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// File operations carried in a `FILE_OPERATION` item. The client only ever
/// sends `Read` and `Replace`.
#[repr(u16)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    #[default]
    Idle = 0x0000,
    Read = 0x0001,
    Replace = 0x0002,
    Append = 0x0003,
    Delete = 0x0004,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApduError {
    #[error("APDU header truncated")]
    ShortHeader,
    #[error("APDU payload truncated: declared {declared}, got {got}")]
    ShortPayload { declared: usize, got: usize },
    #[error("unknown APDU type: 0x{0:04x}")]
    UnknownType(u16),
    #[error("unknown APDU item type: 0x{0:04x}")]
    UnknownItemType(u16),
    #[error("APDU item runs past the payload end")]
    ItemOverrun,
    #[error("payload too large for a 16-bit length: {0}")]
    Oversize(usize),
}

/// One type-length-value entry inside a structured APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduItem {
    pub item_type: ApduItemType,
    pub data: Bytes,
}

impl ApduItem {
    pub fn new(item_type: ApduItemType, data: impl Into<Bytes>) -> Self {
        Self {
            item_type,
            data: data.into(),
        }
    }
}

/// A decoded APDU: either a structured frame with items or an opaque
/// `F_DATA` chunk. A `Generic` never carries the `F_DATA` type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apdu {
    Generic {
        apdu_type: ApduType,
        items: Vec<ApduItem>,
    },
    FData {
        data: Bytes,
    },
}

impl Apdu {
    pub fn generic(apdu_type: ApduType, items: Vec<ApduItem>) -> Self {
        debug_assert!(apdu_type != ApduType::FData);
        Self::Generic { apdu_type, items }
    }

    pub fn f_data(data: impl Into<Bytes>) -> Self {
        Self::FData { data: data.into() }
    }

    pub fn apdu_type(&self) -> ApduType {
        match self {
            Self::Generic { apdu_type, .. } => *apdu_type,
            Self::FData { .. } => ApduType::FData,
        }
    }

    /// Data of the first item with the given type, if present.
    pub fn get_item(&self, item_type: ApduItemType) -> Option<&[u8]> {
        match self {
            Self::Generic { items, .. } => items
                .iter()
                .find(|i| i.item_type == item_type)
                .map(|i| i.data.as_ref()),
            Self::FData { .. } => None,
        }
    }

    /// Replaces the first item with the given type, or appends a new one.
    pub fn set_item(&mut self, item_type: ApduItemType, data: impl Into<Bytes>) {
        if let Self::Generic { items, .. } = self {
            let data = data.into();
            match items.iter_mut().find(|i| i.item_type == item_type) {
                Some(item) => item.data = data,
                None => items.push(ApduItem::new(item_type, data)),
            }
        }
    }

    /// Serialises the APDU frame (type, length, payload).
    pub fn to_bytes(&self) -> Result<Vec<u8>, ApduError> {
        let payload = match self {
            Self::Generic { items, .. } => {
                let mut payload = Vec::new();
                for item in items {
                    payload.extend_from_slice(&item.item_type.code().to_be_bytes());
                    let len = u16::try_from(item.data.len())
                        .map_err(|_| ApduError::Oversize(item.data.len()))?;
                    payload.extend_from_slice(&len.to_be_bytes());
                    payload.extend_from_slice(&item.data);
                }
                payload
            },
            Self::FData { data } => data.to_vec(),
        };

        let len =
            u16::try_from(payload.len()).map_err(|_| ApduError::Oversize(payload.len()))?;
        let mut out = Vec::with_capacity(4 + payload.len());
        out.extend_from_slice(&self.apdu_type().code().to_be_bytes());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parses one APDU frame from the front of `buf`. Bytes past the
    /// declared payload are ignored.
    pub fn parse(buf: &[u8]) -> Result<Self, ApduError> {
        if buf.len() < 4 {
            return Err(ApduError::ShortHeader);
        }
        let raw_type = u16::from_be_bytes([buf[0], buf[1]]);
        let apdu_type = ApduType::from_u16(raw_type).ok_or(ApduError::UnknownType(raw_type))?;
        let declared = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let payload = &buf[4..];
        if payload.len() < declared {
            return Err(ApduError::ShortPayload {
                declared,
                got: payload.len(),
            });
        }
        let payload = &payload[..declared];

        if apdu_type == ApduType::FData {
            return Ok(Self::FData {
                data: Bytes::copy_from_slice(payload),
            });
        }

        let mut items = Vec::new();
        let mut rest = payload;
        while !rest.is_empty() {
            if rest.len() < 4 {
                return Err(ApduError::ItemOverrun);
            }
            let raw_item = u16::from_be_bytes([rest[0], rest[1]]);
            let item_type =
                ApduItemType::from_u16(raw_item).ok_or(ApduError::UnknownItemType(raw_item))?;
            let item_len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            if rest.len() < 4 + item_len {
                return Err(ApduError::ItemOverrun);
            }
            items.push(ApduItem::new(
                item_type,
                Bytes::copy_from_slice(&rest[4..4 + item_len]),
            ));
            rest = &rest[4 + item_len..];
        }

        Ok(Self::Generic { apdu_type, items })
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

//! Terminal-discovery messages.
//!
//! Discovery frames are `u16 type · u16 length · payload`, big-endian. The
//! sweep sends a GET_TERMINAL_TYPE request and decodes the terminal's
//! self-description from the response.

use thiserror::Error;
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
};

pub const GET_TERMINAL_TYPE_REQUEST: u16 = 0x4032;
pub const GET_TERMINAL_TYPE_RESPONSE: u16 = 0x8032;
pub const UNDEFINED: u16 = 0x0000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("reached end of stream")]
    EndOfStream,
    #[error("message payload truncated: declared {declared}, got {got}")]
    ShortPayload { declared: usize, got: usize },
    #[error("message type mismatch: 0x{0:04x}")]
    TypeMismatch(u16),
}

/// Response payload layout. The two reserved gaps are preserved as zeros on
/// write and ignored on read.
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
struct TerminalTypePayload {
    protocol_version: U32<BigEndian>,
    model_id: [u8; 2],
    model_sub_id: [u8; 2],
    serial: [u8; 8],
    software_version: [u8; 8],
    bb_index: U16<BigEndian>,
    reserved1: [u8; 2],
    printer_version: [u8; 4],
    reserved2: [u8; 4],
}

/// Decoded GET_TERMINAL_TYPE response.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TerminalTypeResponse {
    pub protocol_version: u32,
    pub model_id: String,
    pub model_sub_id: String,
    pub serial: String,
    pub software_version: String,
    pub bb_index: u16,
    pub printer_version: String,
}

/// One discovery message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Probe carrying the requester's 8-byte serial (blank allowed).
    GetTerminalTypeRequest { serial: [u8; 8] },
    GetTerminalTypeResponse(TerminalTypeResponse),
    /// Any frame with an unrecognised type code.
    Generic { message_type: u16, payload: Vec<u8> },
}

fn ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl Message {
    pub fn message_type(&self) -> u16 {
        match self {
            Self::GetTerminalTypeRequest { .. } => GET_TERMINAL_TYPE_REQUEST,
            Self::GetTerminalTypeResponse(_) => GET_TERMINAL_TYPE_RESPONSE,
            Self::Generic { message_type, .. } => *message_type,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = match self {
            Self::GetTerminalTypeRequest { serial } => serial.to_vec(),
            Self::GetTerminalTypeResponse(r) => {
                let mut p = TerminalTypePayload {
                    protocol_version: U32::new(r.protocol_version),
                    bb_index: U16::new(r.bb_index),
                    ..Default::default()
                };
                copy_ascii(&mut p.model_id, &r.model_id);
                copy_ascii(&mut p.model_sub_id, &r.model_sub_id);
                copy_ascii(&mut p.serial, &r.serial);
                copy_ascii(&mut p.software_version, &r.software_version);
                copy_ascii(&mut p.printer_version, &r.printer_version);
                p.as_bytes().to_vec()
            },
            Self::Generic { payload, .. } => payload.clone(),
        };

        let mut out = Vec::with_capacity(4 + payload.len());
        out.extend_from_slice(&self.message_type().to_be_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Parses one message from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < 4 {
            return Err(MessageError::EndOfStream);
        }
        let message_type = u16::from_be_bytes([buf[0], buf[1]]);
        let declared = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let payload = &buf[4..];
        if payload.len() < declared {
            return Err(MessageError::ShortPayload {
                declared,
                got: payload.len(),
            });
        }
        let payload = &payload[..declared];

        match message_type {
            GET_TERMINAL_TYPE_REQUEST => {
                let serial: [u8; 8] = payload
                    .get(..8)
                    .and_then(|s| s.try_into().ok())
                    .ok_or(MessageError::ShortPayload {
                        declared: 8,
                        got: payload.len(),
                    })?;
                Ok(Self::GetTerminalTypeRequest { serial })
            },
            GET_TERMINAL_TYPE_RESPONSE => {
                let (p, _rest) = TerminalTypePayload::read_from_prefix(payload).map_err(|_| {
                    MessageError::ShortPayload {
                        declared: size_of::<TerminalTypePayload>(),
                        got: payload.len(),
                    }
                })?;
                Ok(Self::GetTerminalTypeResponse(TerminalTypeResponse {
                    protocol_version: p.protocol_version.get(),
                    model_id: ascii(&p.model_id),
                    model_sub_id: ascii(&p.model_sub_id),
                    serial: ascii(&p.serial),
                    software_version: ascii(&p.software_version),
                    bb_index: p.bb_index.get(),
                    printer_version: ascii(&p.printer_version),
                }))
            },
            _ => Ok(Self::Generic {
                message_type,
                payload: payload.to_vec(),
            }),
        }
    }
}

/// Blank-padded copy of an ASCII field into a fixed-width slot.
fn copy_ascii(dst: &mut [u8], src: &str) {
    let bytes = src.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

/// The probe the scanner broadcasts: a request with a blank serial.
pub fn blank_request() -> Message {
    Message::GetTerminalTypeRequest { serial: [0u8; 8] }
}

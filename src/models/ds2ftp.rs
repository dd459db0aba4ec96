// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 dknw-client-rs contributors

//! DS2FTP command frames.
//!
//! Every control-channel command starts with the 4-byte `"DS2\0"` magic and
//! a big-endian 32-bit opcode, carries a fixed-width body and ends with a
//! 32-bit checksum: the bitwise NOT of the sum of all preceding big-endian
//! 32-bit words (the tail zero-padded to a word boundary).
//!
//! ERRORCTS is the one variable-length frame: the CTS fields, four reserved
//! bytes, a `\n`-terminated ASCII message, zero padding to a word boundary
//! and the checksum. Peers never verify the ERRORCTS checksum on read; the
//! variable message makes its position ambiguous for the terminal firmware,
//! and rejecting a server's error report helps nobody.

use std::fmt;

use thiserror::Error;
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32,
};

pub const DS2_MAGIC: [u8; 4] = *b"DS2\0";

pub const DS2INFO_LEN: usize = 0x4C;
pub const RTS_LEN: usize = 0x1C;
pub const CTS_LEN: usize = 0x18;
pub const ERRORCTS_MIN_LEN: usize = 0x18;

/// DS2FTP opcodes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdType {
    Ds2Info = 0x0000_0000,
    Rts = 0x0000_0001,
    Cts = 0x0000_0002,
    ErrorCts = 0x8000_0002,
}

impl CmdType {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0x0000_0000 => Self::Ds2Info,
            0x0000_0001 => Self::Rts,
            0x0000_0002 => Self::Cts,
            0x8000_0002 => Self::ErrorCts,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Fixed frame length including magic, opcode and checksum. ERRORCTS
    /// reports its minimum; the message extends it.
    pub fn frame_len(self) -> usize {
        match self {
            Self::Ds2Info => DS2INFO_LEN,
            Self::Rts => RTS_LEN,
            Self::Cts => CTS_LEN,
            Self::ErrorCts => ERRORCTS_MIN_LEN,
        }
    }
}

/// Client-side transfer-direction tracker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    #[default]
    None,
    Get,
    Put,
}

/// Error codes carried in an outgoing ERRORCTS.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Fopen = 1,
    Network = 2,
    Timeout = 3,
    Checksum = 4,
    Unknown = 99,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("invalid magic: {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unknown opcode: 0x{0:08x}")]
    UnknownOpcode(u32),
    #[error("length mismatch for {cmd:?}: expected {expected}, got {got}")]
    LengthMismatch {
        cmd: CmdType,
        expected: usize,
        got: usize,
    },
    #[error("checksum mismatch: calculated 0x{calculated:08x}, received 0x{received:08x}")]
    ChecksumMismatch { calculated: u32, received: u32 },
}

/// `~Σwords` over big-endian 32-bit words, the tail zero-padded.
pub fn checksum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut chunks = data.chunks_exact(4);
    for word in chunks.by_ref() {
        sum = sum.wrapping_add(u32::from_be_bytes([word[0], word[1], word[2], word[3]]));
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut word = [0u8; 4];
        word[..tail.len()].copy_from_slice(tail);
        sum = sum.wrapping_add(u32::from_be_bytes(word));
    }
    !sum
}

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
struct RtsFrame {
    magic: [u8; 4],
    opcode: U32<BigEndian>,
    dir: U32<BigEndian>,
    file: U32<BigEndian>,
    filesize: U32<BigEndian>,
    serial: U32<BigEndian>,
    checksum: U32<BigEndian>,
}

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
struct CtsFrame {
    magic: [u8; 4],
    opcode: U32<BigEndian>,
    tsize: U32<BigEndian>,
    fsize: U32<BigEndian>,
    bsize: U32<BigEndian>,
    checksum: U32<BigEndian>,
}

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
struct Ds2InfoFrame {
    magic: [u8; 4],
    opcode: U32<BigEndian>,
    ds2addr: U32<BigEndian>,
    macaddr: [u8; 6],
    pad: [u8; 2],
    serial: [u8; 8],
    throughput: U32<BigEndian>,
    token_group_no: U32<BigEndian>,
    ap_essid: [u8; 32],
    wlan_type: U32<BigEndian>,
    checksum: U32<BigEndian>,
}

/// Request To Send. `filesize == 0` asks to download, `filesize > 0`
/// announces an upload of that many bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rts {
    pub dir: u32,
    pub file: u32,
    pub filesize: u32,
    pub serial: u32,
}

/// Clear To Send: total size, bytes already transferred, next block size.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cts {
    pub tsize: u32,
    pub fsize: u32,
    pub bsize: u32,
}

/// Out-of-band error frame: CTS fields plus a textual diagnostic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorCts {
    pub cts: Cts,
    pub message: String,
}

/// Terminal self-description broadcast on the control channel.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ds2Info {
    pub ds2addr: u32,
    pub macaddr: [u8; 6],
    pub serial: [u8; 8],
    pub throughput: u32,
    pub token_group_no: u32,
    pub ap_essid: [u8; 32],
    pub wlan_type: u32,
}

/// A decoded control-channel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ds2Info(Box<Ds2Info>),
    Rts(Rts),
    Cts(Cts),
    ErrorCts(ErrorCts),
}

impl Command {
    pub fn cmd_type(&self) -> CmdType {
        match self {
            Self::Ds2Info(_) => CmdType::Ds2Info,
            Self::Rts(_) => CmdType::Rts,
            Self::Cts(_) => CmdType::Cts,
            Self::ErrorCts(_) => CmdType::ErrorCts,
        }
    }

    /// Parses and validates a complete frame: magic, opcode, fixed length,
    /// and checksum for everything except ERRORCTS.
    pub fn parse(buf: &[u8]) -> Result<Self, CommandError> {
        if buf.len() < 8 {
            return Err(CommandError::TooShort(buf.len()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[..4]);
        if magic != DS2_MAGIC {
            return Err(CommandError::BadMagic(magic));
        }
        let raw_opcode = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let cmd = CmdType::from_u32(raw_opcode).ok_or(CommandError::UnknownOpcode(raw_opcode))?;

        match cmd {
            CmdType::ErrorCts => {
                if buf.len() < ERRORCTS_MIN_LEN {
                    return Err(CommandError::LengthMismatch {
                        cmd,
                        expected: ERRORCTS_MIN_LEN,
                        got: buf.len(),
                    });
                }
                // Checksum deliberately unverified, matching the peers.
                let cts = Cts {
                    tsize: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
                    fsize: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
                    bsize: u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]),
                };
                let tail = &buf[ERRORCTS_MIN_LEN..];
                let message = match tail.iter().position(|&b| b == b'\n') {
                    Some(end) => String::from_utf8_lossy(&tail[..end]).into_owned(),
                    None => String::from_utf8_lossy(tail)
                        .trim_end_matches('\0')
                        .to_string(),
                };
                Ok(Self::ErrorCts(ErrorCts { cts, message }))
            },
            _ => {
                let expected = cmd.frame_len();
                if buf.len() != expected {
                    return Err(CommandError::LengthMismatch {
                        cmd,
                        expected,
                        got: buf.len(),
                    });
                }
                let calculated = checksum(&buf[..buf.len() - 4]);
                let received = u32::from_be_bytes([
                    buf[buf.len() - 4],
                    buf[buf.len() - 3],
                    buf[buf.len() - 2],
                    buf[buf.len() - 1],
                ]);
                if calculated != received {
                    return Err(CommandError::ChecksumMismatch {
                        calculated,
                        received,
                    });
                }

                match cmd {
                    CmdType::Rts => {
                        let frame = RtsFrame::read_from_bytes(buf)
                            .map_err(|_| CommandError::TooShort(buf.len()))?;
                        Ok(Self::Rts(Rts {
                            dir: frame.dir.get(),
                            file: frame.file.get(),
                            filesize: frame.filesize.get(),
                            serial: frame.serial.get(),
                        }))
                    },
                    CmdType::Cts => {
                        let frame = CtsFrame::read_from_bytes(buf)
                            .map_err(|_| CommandError::TooShort(buf.len()))?;
                        Ok(Self::Cts(Cts {
                            tsize: frame.tsize.get(),
                            fsize: frame.fsize.get(),
                            bsize: frame.bsize.get(),
                        }))
                    },
                    CmdType::Ds2Info => {
                        let frame = Ds2InfoFrame::read_from_bytes(buf)
                            .map_err(|_| CommandError::TooShort(buf.len()))?;
                        Ok(Self::Ds2Info(Box::new(Ds2Info {
                            ds2addr: frame.ds2addr.get(),
                            macaddr: frame.macaddr,
                            serial: frame.serial,
                            throughput: frame.throughput.get(),
                            token_group_no: frame.token_group_no.get(),
                            ap_essid: frame.ap_essid,
                            wlan_type: frame.wlan_type.get(),
                        })))
                    },
                    CmdType::ErrorCts => unreachable!("handled above"),
                }
            },
        }
    }
}

/// Builds an RTS frame.
pub fn make_rts(dir: u32, file: u32, filesize: u32, serial: u32) -> Vec<u8> {
    let mut frame = RtsFrame {
        magic: DS2_MAGIC,
        opcode: U32::new(CmdType::Rts.code()),
        dir: U32::new(dir),
        file: U32::new(file),
        filesize: U32::new(filesize),
        serial: U32::new(serial),
        checksum: U32::new(0),
    };
    let body_len = RTS_LEN - 4;
    frame.checksum = U32::new(checksum(&frame.as_bytes()[..body_len]));
    frame.as_bytes().to_vec()
}

/// Builds a CTS frame.
pub fn make_cts(tsize: u32, fsize: u32, bsize: u32) -> Vec<u8> {
    let mut frame = CtsFrame {
        magic: DS2_MAGIC,
        opcode: U32::new(CmdType::Cts.code()),
        tsize: U32::new(tsize),
        fsize: U32::new(fsize),
        bsize: U32::new(bsize),
        checksum: U32::new(0),
    };
    let body_len = CTS_LEN - 4;
    frame.checksum = U32::new(checksum(&frame.as_bytes()[..body_len]));
    frame.as_bytes().to_vec()
}

/// Builds an ERRORCTS frame. With a message: 24-byte fixed part (the last
/// four bytes reserved), `message\n`, zero padding to a word boundary, then
/// the checksum. Without one: the minimal 0x18-byte frame.
pub fn make_errorcts(tsize: u32, fsize: u32, bsize: u32, message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(ERRORCTS_MIN_LEN + message.len() + 8);
    out.extend_from_slice(&DS2_MAGIC);
    out.extend_from_slice(&CmdType::ErrorCts.code().to_be_bytes());
    out.extend_from_slice(&tsize.to_be_bytes());
    out.extend_from_slice(&fsize.to_be_bytes());
    out.extend_from_slice(&bsize.to_be_bytes());
    if !message.is_empty() {
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(message.as_bytes());
        out.push(b'\n');
    }
    while out.len() % 4 != 0 {
        out.push(0);
    }
    let cksum = checksum(&out);
    out.extend_from_slice(&cksum.to_be_bytes());
    out
}

impl fmt::Display for Cts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tsize={} fsize={} bsize={}",
            self.tsize, self.fsize, self.bsize
        )
    }
}

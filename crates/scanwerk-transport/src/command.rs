// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command block framing.
//
// Group-0 opcodes (below 0x20) encode to 6 bytes:
//   opcode, flags, data-type, 0, transfer length (8 bit), qualifier (8 bit)
// Group-1 opcodes encode to 10 bytes:
//   opcode, flags, data-type, 0, qualifier (16 bit BE), transfer length (24 bit BE), 0

use scanwerk_core::{Result, ScanError};

/// Protocol opcodes.
pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const MEDIA_CHECK: u8 = 0x08;
    pub const INQUIRY: u8 = 0x12;
    pub const RESERVE_UNIT: u8 = 0x16;
    pub const RELEASE_UNIT: u8 = 0x17;
    pub const SCAN: u8 = 0x1b;
    pub const SET_WINDOW: u8 = 0x24;
    pub const READ: u8 = 0x28;
    pub const SEND: u8 = 0x2a;
    pub const OBJECT_POSITION: u8 = 0x31;
}

/// Data-type codes carried by READ and SEND.
pub mod data_type {
    pub const IMAGE: u8 = 0x00;
    pub const CALIB_FORMAT: u8 = 0x60;
    pub const CALIB_GRAY: u8 = 0x61;
    pub const CALIB_COLOR: u8 = 0x62;
    pub const CALIB_DARK: u8 = 0x66;
    /// One raw line from a calibration trial scan.
    pub const TRIAL_LINE: u8 = 0x68;
    pub const CALIB_UPLOAD: u8 = 0x82;
    /// Analog front-end offset/gain registers.
    pub const FRONTEND: u8 = 0x8f;
}

/// SCAN qualifier bits.
pub mod scan_flags {
    /// Frontend trial: lamp on, motor and shading off, one line buffered.
    pub const TRIAL: u8 = 0x01;
    pub const PREVIEW: u8 = 0x40;
}

/// Length of the REQUEST SENSE reply.
pub const SENSE_LEN: usize = 22;

/// Largest transfer length a 24-bit length field can carry.
pub const MAX_TRANSFER_LEN: u32 = 0x00ff_ffff;

/// Timeout class of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Short identity query (INQUIRY).
    Inquiry,
    /// Readiness poll (TEST UNIT READY).
    Readiness,
    /// Everything else, including bulk image reads.
    Standard,
}

/// A fixed-layout command record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Command {
    pub opcode: u8,
    pub flags: u8,
    pub data_type: u8,
    pub qualifier: u16,
    pub transfer_len: u32,
}

impl Command {
    pub fn new(opcode: u8) -> Self {
        Self {
            opcode,
            ..Self::default()
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_data_type(mut self, data_type: u8) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_qualifier(mut self, qualifier: u16) -> Self {
        self.qualifier = qualifier;
        self
    }

    /// Set the transfer length, rejecting values the wire format cannot carry.
    pub fn with_transfer_len(mut self, len: usize) -> Result<Self> {
        let limit = if self.is_group0() {
            u8::MAX as usize
        } else {
            MAX_TRANSFER_LEN as usize
        };
        if len > limit {
            return Err(ScanError::InvalidParameter(format!(
                "transfer length {len} exceeds {limit} for opcode {:#04x}",
                self.opcode
            )));
        }
        self.transfer_len = len as u32;
        Ok(self)
    }

    pub fn is_group0(&self) -> bool {
        self.opcode < 0x20
    }

    /// Size of the encoded block.
    pub fn encoded_len(&self) -> usize {
        if self.is_group0() { 6 } else { 10 }
    }

    pub fn class(&self) -> CommandClass {
        match self.opcode {
            opcode::INQUIRY => CommandClass::Inquiry,
            opcode::TEST_UNIT_READY => CommandClass::Readiness,
            _ => CommandClass::Standard,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        if self.is_group0() {
            vec![
                self.opcode,
                self.flags,
                self.data_type,
                0,
                self.transfer_len as u8,
                self.qualifier as u8,
            ]
        } else {
            let mut block = vec![0u8; 10];
            block[0] = self.opcode;
            block[1] = self.flags;
            block[2] = self.data_type;
            put_u16(&mut block[4..6], self.qualifier);
            put_u24(&mut block[6..9], self.transfer_len);
            block
        }
    }

    /// Parse a block produced by [`Command::encode`]. Trailing padding is ignored.
    pub fn decode(block: &[u8]) -> Option<Self> {
        let opcode = *block.first()?;
        let cmd = Self::new(opcode);
        if cmd.is_group0() {
            let b = block.get(..6)?;
            Some(Self {
                opcode,
                flags: b[1],
                data_type: b[2],
                qualifier: u16::from(b[5]),
                transfer_len: u32::from(b[4]),
            })
        } else {
            let b = block.get(..10)?;
            Some(Self {
                opcode,
                flags: b[1],
                data_type: b[2],
                qualifier: get_u16(&b[4..6]),
                transfer_len: get_u24(&b[6..9]),
            })
        }
    }
}

// -- Big-endian field helpers --

pub fn put_u16(dst: &mut [u8], v: u16) {
    dst[..2].copy_from_slice(&v.to_be_bytes());
}

pub fn put_u24(dst: &mut [u8], v: u32) {
    dst[0] = (v >> 16) as u8;
    dst[1] = (v >> 8) as u8;
    dst[2] = v as u8;
}

pub fn put_u32(dst: &mut [u8], v: u32) {
    dst[..4].copy_from_slice(&v.to_be_bytes());
}

pub fn get_u16(src: &[u8]) -> u16 {
    u16::from_be_bytes([src[0], src[1]])
}

pub fn get_u24(src: &[u8]) -> u32 {
    (u32::from(src[0]) << 16) | (u32::from(src[1]) << 8) | u32::from(src[2])
}

pub fn get_u32(src: &[u8]) -> u32 {
    u32::from_be_bytes([src[0], src[1], src[2], src[3]])
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sense response decoding.
//
// A sense block is returned by REQUEST SENSE after a failed command. Byte 0
// carries the validity bit and error class, byte 2 the sense key plus the
// end-of-scan flag, bytes 12/13 the additional sense code and qualifier.
// The additional code wins over the sense key when the table maps it.

use scanwerk_core::{ErrorKind, ScanError};
use tracing::debug;

use crate::command::SENSE_LEN;

/// Sense keys the engine distinguishes.
pub mod key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const HARDWARE_ERROR: u8 = 0x04;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
    pub const ABORTED_COMMAND: u8 = 0x0b;
}

/// Decoded sense block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseData {
    pub valid: bool,
    pub error_class: u8,
    pub sense_key: u8,
    pub end_of_scan: bool,
    pub asc: u8,
    pub ascq: u8,
}

struct AdditionalSense {
    asc: u8,
    ascq: u8,
    text: &'static str,
    kind: Option<ErrorKind>,
}

const fn entry(asc: u8, ascq: u8, text: &'static str, kind: Option<ErrorKind>) -> AdditionalSense {
    AdditionalSense {
        asc,
        ascq,
        text,
        kind,
    }
}

static ADDITIONAL_SENSE: &[AdditionalSense] = &[
    entry(0x00, 0x00, "no additional sense information", None),
    entry(0x00, 0x06, "I/O process terminated", None),
    entry(0x15, 0x01, "mechanical positioning error", None),
    entry(0x15, 0x02, "flatbed home sensor error", None),
    entry(0x15, 0x03, "ADF home sensor error", None),
    entry(0x15, 0x04, "lock error", None),
    entry(0x1a, 0x00, "parameter list length error", None),
    entry(0x20, 0x00, "invalid command", None),
    entry(0x24, 0x00, "invalid field in command block", None),
    entry(0x25, 0x00, "logical unit not supported", None),
    entry(0x26, 0x00, "invalid field in parameter list", None),
    entry(0x26, 0x01, "parameter not supported", None),
    entry(0x26, 0x02, "parameter value invalid", None),
    entry(0x29, 0x00, "power-on or reset occurred", None),
    entry(0x2c, 0x02, "invalid combination of window specified", None),
    entry(0x2f, 0x00, "command cleared by another initiator", None),
    entry(0x3d, 0x00, "invalid bit in identify message", None),
    entry(0x43, 0x00, "message error", None),
    entry(0x44, 0x00, "internal target failure", None),
    entry(0x44, 0x01, "flatbed DRAM error", None),
    entry(0x44, 0x02, "ADF DRAM error", None),
    entry(0x44, 0x03, "write NVRAM error", None),
    entry(0x47, 0x00, "parity error", None),
    entry(0x49, 0x00, "invalid message error", None),
    entry(0x60, 0x00, "lamp failure", None),
    entry(0x60, 0x01, "flatbed lamp error", None),
    entry(0x60, 0x02, "ADF lamp error", None),
    entry(0x62, 0x00, "scan head positioning error", None),
    entry(0x80, 0x01, "ADF paper jam", Some(ErrorKind::MediaJam)),
    entry(0x80, 0x02, "ADF cover open", Some(ErrorKind::CoverOpen)),
    entry(0x80, 0x03, "ADF chute empty", Some(ErrorKind::NoMedia)),
    entry(0x80, 0x04, "ADF paper end", Some(ErrorKind::MediaEnd)),
    entry(0x80, 0x05, "multi-feed", None),
    entry(0x80, 0x06, "ADF prefeeding", None),
    entry(0x80, 0x07, "flatbed cover open", Some(ErrorKind::CoverOpen)),
    entry(0x80, 0x08, "firmware module does not match scanner", None),
    entry(0x80, 0x09, "papers fed from multiple trays", None),
    entry(0x80, 0x0a, "ADF paper start", None),
    entry(0x80, 0x0b, "multiple ADF paper end and start", None),
    entry(0x80, 0x0c, "multiple ADF paper end", None),
    entry(0x81, 0x00, "front door open", Some(ErrorKind::CoverOpen)),
    entry(0x81, 0x01, "holder cartridge open", Some(ErrorKind::CoverOpen)),
    entry(0x81, 0x02, "no film inside", Some(ErrorKind::NoMedia)),
    entry(0x81, 0x03, "initial load failed", None),
    entry(0x81, 0x04, "film end", Some(ErrorKind::NoMedia)),
    entry(0x81, 0x05, "forward feed error", None),
    entry(0x81, 0x06, "rewind error", None),
    entry(0x81, 0x07, "set unload", None),
    entry(0x81, 0x08, "adapter error", None),
    entry(0x90, 0x00, "scanner busy", Some(ErrorKind::DeviceBusy)),
    entry(0xa0, 0x01, "filter positioning error", None),
];

/// Text for an additional sense code/qualifier pair.
pub fn describe(asc: u8, ascq: u8) -> &'static str {
    lookup(asc, ascq).map_or("unknown additional sense", |e| e.text)
}

fn lookup(asc: u8, ascq: u8) -> Option<&'static AdditionalSense> {
    ADDITIONAL_SENSE
        .iter()
        .find(|e| e.asc == asc && e.ascq == ascq)
}

impl SenseData {
    pub fn new(sense_key: u8, asc: u8, ascq: u8) -> Self {
        Self {
            valid: true,
            error_class: 0x70,
            sense_key,
            end_of_scan: false,
            asc,
            ascq,
        }
    }

    pub fn parse(raw: &[u8]) -> Result<Self, ScanError> {
        if raw.len() < 14 {
            return Err(ScanError::Io(format!(
                "sense block too short: {} bytes",
                raw.len()
            )));
        }
        Ok(Self {
            valid: raw[0] & 0x80 != 0,
            error_class: raw[0] & 0x7f,
            sense_key: raw[2] & 0x0f,
            end_of_scan: raw[2] & 0x40 != 0,
            asc: raw[12],
            ascq: raw[13],
        })
    }

    pub fn encode(&self) -> [u8; SENSE_LEN] {
        let mut raw = [0u8; SENSE_LEN];
        raw[0] = self.error_class | if self.valid { 0x80 } else { 0 };
        raw[2] = self.sense_key | if self.end_of_scan { 0x40 } else { 0 };
        raw[7] = (SENSE_LEN - 8) as u8;
        raw[12] = self.asc;
        raw[13] = self.ascq;
        raw
    }

    pub fn description(&self) -> &'static str {
        describe(self.asc, self.ascq)
    }

    /// Map to the error taxonomy. `None` means the command actually succeeded.
    pub fn kind(&self) -> Option<ErrorKind> {
        if let Some(kind) = lookup(self.asc, self.ascq).and_then(|e| e.kind) {
            return Some(kind);
        }
        match self.sense_key {
            key::NO_SENSE => None,
            key::MEDIUM_ERROR => Some(ErrorKind::MediaJam),
            key::ILLEGAL_REQUEST => Some(ErrorKind::InvalidParameter),
            key::ABORTED_COMMAND => Some(ErrorKind::Cancelled),
            _ => Some(ErrorKind::IoError),
        }
    }

    /// Fold the sense block into a command result.
    pub fn into_result(self) -> Result<(), ScanError> {
        debug!(
            key = self.sense_key,
            asc = self.asc,
            ascq = self.ascq,
            end_of_scan = self.end_of_scan,
            text = self.description(),
            "sense"
        );
        match self.kind() {
            None => Ok(()),
            Some(kind) => Err(ScanError::from_kind(
                kind,
                format!(
                    "sense key {:#04x}: {} ({:#04x}/{:#04x})",
                    self.sense_key,
                    self.description(),
                    self.asc,
                    self.ascq
                ),
            )),
        }
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fixed-layout payloads exchanged with the device: the SET WINDOW payload,
// the calibration format block and the analog front-end register block.
//
// Both the engine and the virtual device use these, so field offsets live in
// exactly one place.

use scanwerk_core::{Result, ScanError};

use crate::command::{get_u16, get_u32, put_u16, put_u32};

// -- Window --

/// Header bytes preceding the window descriptor.
const WINDOW_HEADER_LEN: usize = 8;
/// Standard descriptor bytes before the vendor parameter block.
const DESCRIPTOR_FIXED_LEN: usize = 42;
/// Vendor parameter block length, old layout.
const PARAMS_OLD_LEN: usize = 9;
/// Vendor parameter block length, current layout.
const PARAMS_NEW_LEN: usize = 20;

/// Full payload length for the old and the current layout.
pub const WINDOW_OLD_LEN: usize = WINDOW_HEADER_LEN + DESCRIPTOR_FIXED_LEN + PARAMS_OLD_LEN;
pub const WINDOW_NEW_LEN: usize = WINDOW_HEADER_LEN + DESCRIPTOR_FIXED_LEN + PARAMS_NEW_LEN;

/// Unit the window position fields are expressed in.
pub const WINDOW_BASE_DPI: u32 = 1200;

mod win {
    pub const DESC_LEN: usize = 6;
    pub const XRES: usize = 10;
    pub const YRES: usize = 12;
    pub const ULX: usize = 14;
    pub const ULY: usize = 18;
    pub const WIDTH: usize = 22;
    pub const LENGTH: usize = 26;
    pub const BRIGHTNESS: usize = 30;
    pub const THRESHOLD: usize = 31;
    pub const CONTRAST: usize = 32;
    pub const IMAGE_COMP: usize = 33;
    pub const BPC: usize = 34;
    pub const PADDING: usize = 37;
    pub const PAPER_LENGTH: usize = 42;
    pub const VENDOR: usize = 48;
    pub const PARA_LEN: usize = 49;
    pub const BITSET1: usize = 50;
    pub const HIGHLIGHT: usize = 51;
    pub const SHADOW: usize = 52;
    pub const LINE_WIDTH: usize = 53;
    pub const LINE_COUNT: usize = 55;
    pub const BITSET2: usize = 57;
    pub const BITSET3: usize = 65;
    pub const LINE_WIDTH_MSB: usize = 67;
    pub const LINE_COUNT_MSB: usize = 68;
    pub const BACKGROUND_LINES: usize = 69;
}

/// Bits of the first vendor flag byte.
pub mod bitset1 {
    pub const FILTER_RGB: u8 = 0x20;
    /// Line width and count come from the window, not the firmware.
    pub const USE_LINE_GEOMETRY: u8 = 0x40;
    pub const ADF: u8 = 0x80;
}

/// Bits of the second vendor flag byte.
pub mod bitset2 {
    pub const TRANSPARENCY: u8 = 0x80;
}

/// Bits of the third vendor flag byte.
pub mod bitset3 {
    pub const DUPLEX: u8 = 0x01;
    pub const FLIP: u8 = 0x02;
    pub const MIRROR_REAR: u8 = 0x04;
    pub const REAR: u8 = 0x08;
    pub const INTERLACED_DUPLEX: u8 = 0x10;
}

/// Image composition codes.
pub mod image_comp {
    pub const LINEART: u8 = 0;
    pub const DITHERED: u8 = 1;
    pub const GRAY: u8 = 2;
    pub const COLOR: u8 = 5;
}

/// Decoded SET WINDOW payload.
///
/// Positions are in [`WINDOW_BASE_DPI`] units; `line_width` and `line_count`
/// are what the device will actually deliver per line and per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowDescriptor {
    pub xres: u16,
    pub yres: u16,
    pub ulx: u32,
    pub uly: u32,
    pub width: u32,
    pub length: u32,
    pub image_comp: u8,
    pub bits_per_channel: u8,
    pub bitset1: u8,
    pub line_width: u32,
    pub line_count: u32,
    pub paper_length: u16,
    /// Current layout carries the extended parameter block.
    pub extended: bool,
    pub bitset2: u8,
    pub bitset3: u8,
    pub background_lines: u8,
}

impl WindowDescriptor {
    pub fn encoded_len(&self) -> usize {
        if self.extended {
            WINDOW_NEW_LEN
        } else {
            WINDOW_OLD_LEN
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let len = self.encoded_len();
        let para_len = len - WINDOW_HEADER_LEN - DESCRIPTOR_FIXED_LEN;
        let mut b = vec![0u8; len];

        put_u16(&mut b[win::DESC_LEN..], (DESCRIPTOR_FIXED_LEN + para_len) as u16);
        put_u16(&mut b[win::XRES..], self.xres);
        put_u16(&mut b[win::YRES..], self.yres);
        put_u32(&mut b[win::ULX..], self.ulx);
        put_u32(&mut b[win::ULY..], self.uly);
        put_u32(&mut b[win::WIDTH..], self.width);
        put_u32(&mut b[win::LENGTH..], self.length);
        b[win::BRIGHTNESS] = 128;
        b[win::THRESHOLD] = 128;
        b[win::CONTRAST] = 128;
        b[win::IMAGE_COMP] = self.image_comp;
        b[win::BPC] = self.bits_per_channel;
        b[win::PADDING] = 3;
        put_u16(&mut b[win::PAPER_LENGTH..], self.paper_length);
        b[win::VENDOR] = 0xff;
        b[win::PARA_LEN] = para_len as u8;
        b[win::BITSET1] = self.bitset1;
        b[win::HIGHLIGHT] = 0xff;
        b[win::SHADOW] = 0x00;
        put_u16(&mut b[win::LINE_WIDTH..], self.line_width as u16);
        put_u16(&mut b[win::LINE_COUNT..], self.line_count as u16);
        b[win::BITSET2] = self.bitset2;

        if self.extended {
            b[win::BITSET3] = self.bitset3;
            b[win::LINE_WIDTH_MSB] = (self.line_width >> 16) as u8;
            b[win::LINE_COUNT_MSB] = (self.line_count >> 16) as u8;
            b[win::BACKGROUND_LINES] = self.background_lines;
        }
        b
    }

    pub fn decode(b: &[u8]) -> Result<Self> {
        if b.len() < WINDOW_OLD_LEN {
            return Err(ScanError::InvalidParameter(format!(
                "window payload too short: {} bytes",
                b.len()
            )));
        }
        let para_len = usize::from(b[win::PARA_LEN]);
        let extended = para_len >= PARAMS_NEW_LEN && b.len() >= WINDOW_NEW_LEN;
        let (bitset3, width_msb, count_msb, background_lines) = if extended {
            (
                b[win::BITSET3],
                u32::from(b[win::LINE_WIDTH_MSB]),
                u32::from(b[win::LINE_COUNT_MSB]),
                b[win::BACKGROUND_LINES],
            )
        } else {
            (0, 0, 0, 0)
        };
        Ok(Self {
            xres: get_u16(&b[win::XRES..]),
            yres: get_u16(&b[win::YRES..]),
            ulx: get_u32(&b[win::ULX..]),
            uly: get_u32(&b[win::ULY..]),
            width: get_u32(&b[win::WIDTH..]),
            length: get_u32(&b[win::LENGTH..]),
            image_comp: b[win::IMAGE_COMP],
            bits_per_channel: b[win::BPC],
            bitset1: b[win::BITSET1],
            line_width: (width_msb << 16) | u32::from(get_u16(&b[win::LINE_WIDTH..])),
            line_count: (count_msb << 16) | u32::from(get_u16(&b[win::LINE_COUNT..])),
            paper_length: get_u16(&b[win::PAPER_LENGTH..]),
            extended,
            bitset2: b[win::BITSET2],
            bitset3,
            background_lines,
        })
    }
}

// -- Calibration format --

pub const CALIB_FORMAT_LEN: usize = 32;

/// Bits of the calibration ability byte.
pub mod calib_ability {
    /// Send shading one channel per command.
    pub const MULTI_COMMAND: u8 = 0x01;
    /// Fold dark values into the low bits of the white table.
    pub const MERGE_DARK: u8 = 0x04;
    /// Device wants dark shading.
    pub const NEEDS_DARK: u8 = 0x08;
}

/// Calibration format reported by the device before a shading pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationFormat {
    pub pixels_per_line: u16,
    pub bytes_per_channel: u8,
    /// Reference lines per channel.
    pub lines: u8,
    /// 1 when shading is required.
    pub flags: u8,
    pub ability: u8,
    pub gains: [u8; 3],
    pub white_targets: [u16; 3],
    pub dark_targets: [u16; 3],
}

impl CalibrationFormat {
    pub fn parse(b: &[u8]) -> Result<Self> {
        if b.len() < CALIB_FORMAT_LEN {
            return Err(ScanError::Io(format!(
                "calibration format too short: {} bytes",
                b.len()
            )));
        }
        Ok(Self {
            pixels_per_line: get_u16(&b[0..]),
            bytes_per_channel: b[2],
            lines: b[3],
            flags: b[4],
            ability: b[5],
            gains: [b[6], b[7], b[8]],
            white_targets: [get_u16(&b[9..]), get_u16(&b[11..]), get_u16(&b[13..])],
            dark_targets: [get_u16(&b[15..]), get_u16(&b[17..]), get_u16(&b[19..])],
        })
    }

    pub fn encode(&self) -> [u8; CALIB_FORMAT_LEN] {
        let mut b = [0u8; CALIB_FORMAT_LEN];
        put_u16(&mut b[0..], self.pixels_per_line);
        b[2] = self.bytes_per_channel;
        b[3] = self.lines;
        b[4] = self.flags;
        b[5] = self.ability;
        b[6..9].copy_from_slice(&self.gains);
        for (i, t) in self.white_targets.iter().enumerate() {
            put_u16(&mut b[9 + 2 * i..], *t);
        }
        for (i, t) in self.dark_targets.iter().enumerate() {
            put_u16(&mut b[15 + 2 * i..], *t);
        }
        b
    }

    pub fn shading_required(&self) -> bool {
        self.flags == 1
    }

    pub fn needs_dark(&self) -> bool {
        self.ability & calib_ability::NEEDS_DARK != 0
    }

    pub fn merge_dark(&self) -> bool {
        self.ability & calib_ability::MERGE_DARK != 0
    }

    pub fn multi_command(&self) -> bool {
        self.ability & calib_ability::MULTI_COMMAND != 0
    }
}

// -- Analog front end --

pub const FRONTEND_LEN: usize = 6;

/// Offset and gain registers of the analog front end, per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendRegisters {
    pub offset: [u8; 3],
    pub gain: [u8; 3],
}

impl FrontendRegisters {
    pub fn encode(&self) -> [u8; FRONTEND_LEN] {
        [
            self.offset[0],
            self.offset[1],
            self.offset[2],
            self.gain[0],
            self.gain[1],
            self.gain[2],
        ]
    }

    pub fn decode(b: &[u8]) -> Option<Self> {
        let b = b.get(..FRONTEND_LEN)?;
        Some(Self {
            offset: [b[0], b[1], b[2]],
            gain: [b[3], b[4], b[5]],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> WindowDescriptor {
        WindowDescriptor {
            xres: 300,
            yres: 300,
            ulx: 40,
            uly: 80,
            width: 10201,
            length: 13201,
            image_comp: image_comp::COLOR,
            bits_per_channel: 8,
            bitset1: bitset1::USE_LINE_GEOMETRY | bitset1::FILTER_RGB,
            line_width: 7632,
            line_count: 3300,
            extended: true,
            ..WindowDescriptor::default()
        }
    }

    #[test]
    fn current_layout_lengths_and_header() {
        let b = window().encode();
        assert_eq!(b.len(), 70);
        assert_eq!(get_u16(&b[6..]), 62);
        assert_eq!(b[win::PARA_LEN], 20);
        assert_eq!(b[win::VENDOR], 0xff);
        assert_eq!(get_u16(&b[win::XRES..]), 300);
    }

    #[test]
    fn old_layout_drops_extended_block() {
        let w = WindowDescriptor {
            extended: false,
            bitset3: bitset3::REAR,
            ..window()
        };
        let b = w.encode();
        assert_eq!(b.len(), 59);
        assert_eq!(b[win::PARA_LEN], 9);
        let back = WindowDescriptor::decode(&b).unwrap();
        assert!(!back.extended);
        assert_eq!(back.bitset3, 0);
    }

    #[test]
    fn wide_line_counts_use_msb_bytes() {
        let w = WindowDescriptor {
            line_width: 0x1_2345,
            line_count: 0x2_0001,
            ..window()
        };
        let back = WindowDescriptor::decode(&w.encode()).unwrap();
        assert_eq!(back.line_width, 0x1_2345);
        assert_eq!(back.line_count, 0x2_0001);
    }

    #[test]
    fn short_window_is_rejected() {
        assert!(WindowDescriptor::decode(&[0u8; 20]).is_err());
    }

    #[test]
    fn calibration_format_fields() {
        let mut b = [0u8; CALIB_FORMAT_LEN];
        b[0..2].copy_from_slice(&5100u16.to_be_bytes());
        b[2] = 2;
        b[3] = 12;
        b[4] = 1;
        b[5] = calib_ability::NEEDS_DARK | calib_ability::MULTI_COMMAND;
        b[11..13].copy_from_slice(&0xe000u16.to_be_bytes());
        let f = CalibrationFormat::parse(&b).unwrap();
        assert_eq!(f.pixels_per_line, 5100);
        assert_eq!(f.lines, 12);
        assert!(f.shading_required());
        assert!(f.needs_dark());
        assert!(f.multi_command());
        assert!(!f.merge_dark());
        assert_eq!(f.white_targets[1], 0xe000);
        assert_eq!(f.encode(), b);
    }

    #[test]
    fn frontend_block_layout() {
        let regs = FrontendRegisters {
            offset: [1, 2, 3],
            gain: [4, 5, 6],
        };
        assert_eq!(regs.encode(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(FrontendRegisters::decode(&[1, 2, 3]), None);
    }
}

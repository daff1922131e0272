// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Simulated device profiles and the inquiry block they report.
//
// Ranges are in 300-dpi units, resolutions in dpi, exactly as the device
// would put them on the wire.

use scanwerk_core::config::DeviceQuirks;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Inquiry layout
// ---------------------------------------------------------------------------

pub(crate) const INQUIRY_LEN: usize = 0x88;

mod at {
    pub const VENDOR: usize = 8;
    pub const MODEL: usize = 16;
    pub const REVISION: usize = 32;
    pub const COLOR_TYPE: usize = 36;
    pub const OLD_OPTICAL_RES: usize = 37;
    pub const OLD_MAX_RES: usize = 38;
    pub const PROTOCOL: usize = 39;
    pub const NEW_MAX_RES: usize = 44;
    pub const FEATURES_A: usize = 50;
    pub const FEATURES_B: usize = 51;
    pub const LINE_DIFFERENCE: usize = 53;
    pub const COLOR_BOUNDARY: usize = 54;
    pub const GRAY_BOUNDARY: usize = 55;
    pub const THRESHOLDED_BOUNDARY: usize = 57;
    pub const DITHERED_BOUNDARY: usize = 59;
    pub const CHANNELS: usize = 60;
    pub const BITS_PER_CHANNEL: usize = 61;
    pub const SOURCE_FLAGS: usize = 62;
    pub const TRANSPARENCY_X: usize = 77;
    pub const TRANSPARENCY_Y: usize = 79;
    pub const FLATBED_X: usize = 81;
    pub const FLATBED_Y: usize = 83;
    pub const ADF_X: usize = 85;
    pub const ADF_Y: usize = 87;
    pub const NEW_OPTICAL_RES: usize = 89;
    pub const ASIC: usize = 91;
    pub const BUTTONS: usize = 92;
    pub const FEATURES_C: usize = 93;
    pub const FEATURES_D: usize = 94;
    pub const FEATURES_E: usize = 95;
}

/// Everything the virtual firmware reports about itself and how it behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimProfile {
    pub vendor: String,
    pub model: String,
    pub revision: String,
    /// ASIC generation code.
    pub asic: u8,
    pub new_protocol: bool,
    pub optical_res: u16,
    pub max_res: u16,
    pub sheetfed: bool,
    pub adf: bool,
    pub duplex: bool,
    /// Front and rear of a duplex sheet arrive in one interlaced pass.
    pub duplex_interlaced: bool,
    pub color: bool,
    /// 8, 12 or 16.
    pub bits_per_channel: u8,
    pub needs_calibration: bool,
    pub keeps_window: bool,
    /// Colour channels arrive `line_difference` sensor rows apart.
    pub software_colorpack: bool,
    /// Raw inquiry field; see [`SimProfile::sensor_line_difference`].
    pub line_difference: u8,
    /// Colour lines arrive as three planes.
    pub line_pack: bool,
    pub adf_mirror: bool,
    pub adf_bgr: bool,
    pub paper_length: bool,
    pub flatbed_range: (u16, u16),
    pub transparency_range: (u16, u16),
    pub adf_range: (u16, u16),
    pub buttons: u8,
    /// Sheets in the feeder.
    pub sheets: u32,
    /// Raw lines a sheet yields before the paper runs out.
    pub paper_lines: Option<u32>,
    pub calib_pixels: u16,
    /// Reference lines over all channels.
    pub calib_lines: u8,
    pub calib_bytes_per_channel: u8,
    pub calib_dark: bool,
    pub calib_merge_dark: bool,
    pub calib_multi_command: bool,
    /// Black level the front end shows at offset register zero, negated.
    pub dark_bias: u8,
    /// Quirks the device list carries for this model.
    pub quirks: DeviceQuirks,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self::flatbed()
    }
}

impl SimProfile {
    /// A4 colour flatbed with calibration and a colour line difference.
    pub fn flatbed() -> Self {
        Self {
            vendor: "AVISION".into(),
            model: "AV600 SIM".into(),
            revision: "1.00".into(),
            asic: 6,
            new_protocol: true,
            optical_res: 600,
            max_res: 1200,
            sheetfed: false,
            adf: false,
            duplex: false,
            duplex_interlaced: false,
            color: true,
            bits_per_channel: 16,
            needs_calibration: true,
            keeps_window: false,
            software_colorpack: true,
            line_difference: 8,
            line_pack: false,
            adf_mirror: false,
            adf_bgr: false,
            paper_length: false,
            flatbed_range: (2550, 3508),
            transparency_range: (0, 0),
            adf_range: (0, 0),
            buttons: 0,
            sheets: 0,
            paper_lines: None,
            calib_pixels: 1024,
            calib_lines: 12,
            calib_bytes_per_channel: 2,
            calib_dark: true,
            calib_merge_dark: false,
            calib_multi_command: false,
            dark_bias: 20,
            quirks: DeviceQuirks::default(),
        }
    }

    /// Sheet-fed duplex scanner that interlaces both sides in one pass.
    pub fn sheetfed_duplex() -> Self {
        Self {
            model: "AV220 SIM".into(),
            asic: 5,
            optical_res: 600,
            max_res: 600,
            sheetfed: true,
            adf: true,
            duplex: true,
            duplex_interlaced: true,
            bits_per_channel: 8,
            needs_calibration: false,
            keeps_window: true,
            software_colorpack: false,
            line_difference: 0,
            paper_length: true,
            flatbed_range: (0, 0),
            adf_range: (2550, 4200),
            sheets: 3,
            calib_dark: false,
            ..Self::flatbed()
        }
    }

    /// Flatbed with a feeder that turns the sheet over for the rear side.
    pub fn flipping_duplex() -> Self {
        Self {
            model: "AV186 SIM".into(),
            asic: 7,
            adf: true,
            duplex: true,
            duplex_interlaced: false,
            bits_per_channel: 8,
            needs_calibration: false,
            software_colorpack: false,
            line_difference: 0,
            adf_mirror: true,
            adf_bgr: true,
            adf_range: (2550, 4200),
            sheets: 2,
            quirks: DeviceQuirks {
                adf_flipping_duplex: true,
                ..DeviceQuirks::default()
            },
            ..Self::flatbed()
        }
    }

    /// Raw lines per stripe for this ASIC generation.
    pub fn stripe_lines(&self) -> u32 {
        match self.asic {
            8..=127 => 16,
            a if a >= 5 => 32,
            _ => 8,
        }
    }

    /// Colour line difference in sensor rows, after the generation's scaling
    /// of the raw inquiry field.
    pub fn sensor_line_difference(&self) -> u32 {
        let raw = u32::from(self.line_difference);
        match self.asic {
            3 | 5 => raw / 2,
            7 => raw * 2,
            _ => raw,
        }
    }

    /// Full-length inquiry block. Callers truncate to the requested length.
    pub fn inquiry(&self) -> Vec<u8> {
        let mut d = vec![0u8; INQUIRY_LEN];
        d[0] = 0x06;
        put_ascii(&mut d[at::VENDOR..at::MODEL], &self.vendor);
        put_ascii(&mut d[at::MODEL..at::REVISION], &self.model);
        put_ascii(&mut d[at::REVISION..at::COLOR_TYPE], &self.revision);

        if self.color {
            d[at::COLOR_TYPE] = 0x30;
            d[at::CHANNELS] = 1 << 6;
        } else {
            d[at::CHANNELS] = 1 << 7;
        }
        d[at::OLD_OPTICAL_RES] = (self.optical_res / 100).min(255) as u8;
        d[at::OLD_MAX_RES] = (self.max_res / 100).min(255) as u8;
        if self.new_protocol {
            d[at::PROTOCOL] = 1 << 2;
        }
        put16(&mut d, at::NEW_MAX_RES, self.max_res);
        put16(&mut d, at::NEW_OPTICAL_RES, self.optical_res);

        d[at::FEATURES_A] = bit(self.keeps_window, 1)
            | bit(self.needs_calibration, 4)
            | bit(self.software_colorpack, 5);
        d[at::FEATURES_B] = bit(self.adf_mirror, 0);
        d[at::FEATURES_C] = bit(self.adf_bgr, 6);
        d[at::FEATURES_D] = bit(self.duplex, 5)
            | bit(self.duplex && self.duplex_interlaced, 4)
            | bit(self.line_pack, 6);
        d[at::FEATURES_E] = bit(self.paper_length, 5);
        d[at::LINE_DIFFERENCE] = self.line_difference;
        d[at::COLOR_BOUNDARY] = 8;
        d[at::GRAY_BOUNDARY] = 8;
        d[at::THRESHOLDED_BOUNDARY] = 32;
        d[at::DITHERED_BOUNDARY] = 32;
        d[at::BITS_PER_CHANNEL] = match self.bits_per_channel {
            16 => 1 << 1,
            12 => 1 << 2,
            _ => 1 << 4,
        };
        d[at::SOURCE_FLAGS] = bit(self.sheetfed, 6) | bit(self.adf, 5);

        put16(&mut d, at::TRANSPARENCY_X, self.transparency_range.0);
        put16(&mut d, at::TRANSPARENCY_Y, self.transparency_range.1);
        put16(&mut d, at::FLATBED_X, self.flatbed_range.0);
        put16(&mut d, at::FLATBED_Y, self.flatbed_range.1);
        put16(&mut d, at::ADF_X, self.adf_range.0);
        put16(&mut d, at::ADF_Y, self.adf_range.1);
        d[at::ASIC] = self.asic;
        d[at::BUTTONS] = self.buttons;
        d
    }
}

fn bit(on: bool, n: u8) -> u8 {
    if on { 1 << n } else { 0 }
}

fn put16(d: &mut [u8], at: usize, v: u16) {
    d[at..at + 2].copy_from_slice(&v.to_be_bytes());
}

/// Space-padded ASCII field.
fn put_ascii(field: &mut [u8], text: &str) {
    field.fill(b' ');
    for (dst, src) in field.iter_mut().zip(text.bytes()) {
        *dst = src;
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device capability model.
//
// Built once from the inquiry handshake and never mutated afterwards. Raw bit
// positions stay inside the parser; everything else sees named fields.
// Device-list overrides (`DeviceQuirks`) always win over parsed bits, and
// zero or inconsistent resolution/range fields fall back to documented
// defaults.

pub use scanwerk_core::config::DeviceQuirks;
use scanwerk_core::config::EngineConfig;
use scanwerk_core::{ColorMode, MM_PER_INCH, Result, ScanError, SourceDim, SourceMode};
use scanwerk_transport::Transport;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::commands;

pub const INQUIRY_STANDARD_LEN: usize = 0x24;
pub const INQUIRY_EXTENDED_LEN: usize = 0x60;
pub const INQUIRY_LONG_LEN: usize = 0x88;

/// Peripheral device type of a scanner in byte 0 of the standard inquiry.
const PERIPHERAL_SCANNER: u8 = 0x06;

/// Resolution the scan range fields are expressed in.
const BASE_RES: f64 = 300.0;

// Fallback ranges in inches.
const A4_X_RANGE: f64 = 8.5;
const A4_Y_RANGE: f64 = 11.8;
const A3_X_RANGE: f64 = 11.8;
const A3_Y_RANGE: f64 = 16.5;
const SHEETFEED_Y_RANGE: f64 = 14.0;
const FILM_X_RANGE: f64 = 1.0;
const FILM_Y_RANGE: f64 = 1.0;

/// Byte offsets into the extended inquiry block.
mod offset {
    pub const VENDOR: std::ops::Range<usize> = 8..16;
    pub const MODEL: std::ops::Range<usize> = 16..32;
    pub const REVISION: std::ops::Range<usize> = 32..36;
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
    pub const MAX_SHADING_TARGET: usize = 75;
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

fn bit(byte: u8, n: u8) -> bool {
    byte & (1 << n) != 0
}

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn ascii_field(data: &[u8], range: std::ops::Range<usize>) -> String {
    String::from_utf8_lossy(&data[range])
        .trim_end_matches([' ', '\0'])
        .to_string()
}

// -- ASIC generation --

/// Controller chip generation as reported in the inquiry block.
///
/// Ordering follows the raw code, which is how generation checks compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AsicGeneration(pub u8);

impl AsicGeneration {
    pub const CX: Self = Self(0);
    pub const C1: Self = Self(1);
    pub const W1: Self = Self(2);
    pub const C2: Self = Self(3);
    pub const C5: Self = Self(5);
    pub const C6: Self = Self(6);
    pub const C7: Self = Self(7);
    pub const OA980: Self = Self(128);
    pub const OA982: Self = Self(129);

    /// Generations whose inquiry block continues past the extended length.
    pub fn has_long_inquiry(self) -> bool {
        self == Self::C6 || self == Self::C7
    }

    /// Raw lines moved per stripe.
    pub fn stripe_lines(self) -> u32 {
        if self > Self::C7 && self < Self::OA980 {
            16
        } else if self >= Self::C5 {
            32
        } else {
            8
        }
    }

    /// Scale the raw line-difference field to sensor rows.
    fn scale_line_difference(self, raw: u32) -> u32 {
        match self {
            Self::C2 | Self::C5 => raw / 2,
            Self::C7 => raw * 2,
            _ => raw,
        }
    }
}

/// Physical scanner class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerClass {
    Flatbed,
    Sheetfed,
    Film,
}

// -- Capability record --

/// Pixel alignment each mode class requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBoundaries {
    pub color: u32,
    pub gray: u32,
    pub dithered: u32,
    pub thresholded: u32,
}

/// Maximum scan extent of one source in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanRange {
    pub x_mm: f64,
    pub y_mm: f64,
}

/// Optional features reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFeatures {
    pub adf: bool,
    pub duplex: bool,
    pub duplex_interlaced: bool,
    pub light_box: bool,
    pub needs_calibration: bool,
    pub keeps_window: bool,
    pub keeps_calibration: bool,
    pub needs_software_colorpack: bool,
    pub needs_line_pack: bool,
    pub adf_needs_mirror: bool,
    pub adf_bgr_order: bool,
    pub no_gray_modes: bool,
    pub light_detect: bool,
    pub light_control: bool,
    pub button_control: bool,
    pub exposure_control: bool,
    pub tune_scan_length: bool,
    pub background_raster: bool,
    pub paper_length: bool,
    pub batch_scan: bool,
    pub buttons: u8,
}

/// Read-only description of one attached device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub vendor: String,
    pub model: String,
    pub revision: String,
    pub class: ScannerClass,
    pub asic: AsicGeneration,
    pub new_protocol: bool,
    pub optical_res: u32,
    pub max_res: u32,
    pub channels_per_pixel: u8,
    pub bits_per_channel: u8,
    pub color_modes: Vec<ColorMode>,
    pub sources: Vec<SourceMode>,
    pub boundaries: PixelBoundaries,
    /// Colour sub-scan skew in sensor rows at optical resolution.
    pub line_difference: u32,
    pub stripe_lines: u32,
    /// Qualifier carried by image and calibration reads.
    pub data_qualifier: u16,
    pub max_shading_target: u16,
    pub flatbed_range: ScanRange,
    pub transparency_range: ScanRange,
    pub adf_range: ScanRange,
    pub features: DeviceFeatures,
    pub quirks: DeviceQuirks,
}

/// Whole-device range overrides from the engine configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AreaPolicy {
    pub force_a4: bool,
    pub force_a3: bool,
}

impl From<&EngineConfig> for AreaPolicy {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            force_a4: cfg.force_a4,
            force_a3: cfg.force_a3,
        }
    }
}

impl DeviceCapabilities {
    /// Parse an extended (or long) inquiry block.
    pub fn from_inquiry(data: &[u8], quirks: &DeviceQuirks, area: AreaPolicy) -> Result<Self> {
        if data.len() < INQUIRY_EXTENDED_LEN {
            return Err(ScanError::Io(format!(
                "inquiry block too short: {} bytes",
                data.len()
            )));
        }

        let vendor = ascii_field(data, offset::VENDOR);
        let model = ascii_field(data, offset::MODEL);
        let revision = ascii_field(data, offset::REVISION);

        let source_flags = data[offset::SOURCE_FLAGS];
        let class = if quirks.film_scanner {
            ScannerClass::Film
        } else if bit(source_flags, 6) || bit(source_flags, 4) {
            ScannerClass::Sheetfed
        } else {
            ScannerClass::Flatbed
        };

        let new_protocol = bit(data[offset::PROTOCOL], 2);
        let asic = AsicGeneration(data[offset::ASIC]);
        let fa = data[offset::FEATURES_A];
        let fb = data[offset::FEATURES_B];
        let fc = data[offset::FEATURES_C];
        let fd = data[offset::FEATURES_D];
        let fe = data[offset::FEATURES_E];

        let duplex = bit(source_flags, 2) || bit(fd, 5);
        let mut duplex_interlaced = bit(source_flags, 2) || bit(fd, 4);
        // Early generations interlace without saying so.
        if duplex && asic < AsicGeneration::C6 {
            duplex_interlaced = true;
        }

        let mut adf_bgr_order = bit(fc, 6);
        if quirks.adf_bgr_order_invert {
            adf_bgr_order = !adf_bgr_order;
        }

        let mut features = DeviceFeatures {
            adf: bit(source_flags, 5),
            duplex,
            duplex_interlaced,
            light_box: false,
            needs_calibration: bit(fa, 4),
            keeps_window: quirks.keeps_window.unwrap_or(bit(fa, 1)),
            keeps_calibration: quirks.keeps_calibration,
            needs_software_colorpack: bit(fa, 5),
            needs_line_pack: bit(fd, 6),
            adf_needs_mirror: bit(fb, 0),
            adf_bgr_order,
            no_gray_modes: !quirks.gray_modes && bit(fc, 5),
            light_detect: bit(fc, 2),
            light_control: bit(fa, 7),
            button_control: bit(fa, 6) || bit(fb, 2),
            exposure_control: bit(fb, 7),
            tune_scan_length: !quirks.no_tune_scan_length && bit(fd, 2),
            background_raster: !quirks.no_background && bit(fe, 2),
            paper_length: bit(fe, 5),
            batch_scan: bit(fe, 0),
            buttons: if quirks.no_button { 0 } else { data[offset::BUTTONS] },
        };

        let boundary = |at: usize| match data[at] {
            0 => 8,
            b => u32::from(b),
        };
        let boundaries = PixelBoundaries {
            color: boundary(offset::COLOR_BOUNDARY),
            gray: boundary(offset::GRAY_BOUNDARY),
            dithered: boundary(offset::DITHERED_BOUNDARY),
            thresholded: boundary(offset::THRESHOLDED_BOUNDARY),
        };

        let line_difference =
            asic.scale_line_difference(u32::from(data[offset::LINE_DIFFERENCE]));

        let (mut optical_res, mut max_res) = if new_protocol {
            (
                u32::from(be16(data, offset::NEW_OPTICAL_RES)),
                u32::from(be16(data, offset::NEW_MAX_RES)),
            )
        } else {
            (
                u32::from(data[offset::OLD_OPTICAL_RES]) * 100,
                u32::from(data[offset::OLD_MAX_RES]) * 100,
            )
        };
        if optical_res > max_res {
            warn!(optical_res, max_res, "optical resolution above maximum, adjusting");
            max_res = optical_res;
        }
        if optical_res == 0 {
            optical_res = if class == ScannerClass::Sheetfed { 300 } else { 600 };
            warn!(optical_res, "inquiry optical resolution invalid, using default");
        }
        if max_res == 0 {
            max_res = 1200;
            warn!(max_res, "inquiry max resolution invalid, using default");
        }

        let channels = data[offset::CHANNELS];
        let channels_per_pixel = if bit(channels, 6) {
            3
        } else if bit(channels, 7) {
            1
        } else if (data[offset::COLOR_TYPE] >> 4) & 0x07 > 0 {
            3
        } else {
            1
        };

        let bpc = data[offset::BITS_PER_CHANNEL];
        let mut bits_per_channel = [(1, 16), (2, 12), (3, 10), (4, 8), (5, 6), (6, 4), (7, 1)]
            .into_iter()
            .find(|&(n, _)| bit(bpc, n))
            .map_or(8, |(_, bits)| bits);
        if quirks.twelve_bit_mode {
            bits_per_channel = 12;
        }

        // Film ranges are counted in optical pixels.
        let base = if class == ScannerClass::Film {
            f64::from(optical_res)
        } else {
            BASE_RES
        };
        let raw_range = |x_at: usize, y_at: usize| ScanRange {
            x_mm: f64::from(be16(data, x_at)) * MM_PER_INCH / base + 0.1,
            y_mm: f64::from(be16(data, y_at)) * MM_PER_INCH / base,
        };
        let transparency_raw = raw_range(offset::TRANSPARENCY_X, offset::TRANSPARENCY_Y);
        features.light_box = be16(data, offset::TRANSPARENCY_X) != 0
            && be16(data, offset::TRANSPARENCY_Y) != 0;

        let valid = |at_x: usize, at_y: usize| be16(data, at_x) != 0 && be16(data, at_y) != 0;
        let fix_range = |range: ScanRange, is_valid: bool| -> ScanRange {
            if is_valid {
                if area.force_a4 {
                    ScanRange {
                        x_mm: A4_X_RANGE * MM_PER_INCH,
                        y_mm: A4_Y_RANGE * MM_PER_INCH,
                    }
                } else if area.force_a3 {
                    ScanRange {
                        x_mm: A3_X_RANGE * MM_PER_INCH,
                        y_mm: A3_Y_RANGE * MM_PER_INCH,
                    }
                } else {
                    range
                }
            } else if quirks.force_a3 {
                ScanRange {
                    x_mm: A3_X_RANGE * MM_PER_INCH,
                    y_mm: A3_Y_RANGE * MM_PER_INCH,
                }
            } else if quirks.force_film {
                ScanRange {
                    x_mm: FILM_X_RANGE * MM_PER_INCH,
                    y_mm: FILM_Y_RANGE * MM_PER_INCH,
                }
            } else {
                let y = if class == ScannerClass::Sheetfed {
                    SHEETFEED_Y_RANGE
                } else {
                    A4_Y_RANGE
                };
                ScanRange {
                    x_mm: A4_X_RANGE * MM_PER_INCH,
                    y_mm: y * MM_PER_INCH,
                }
            }
        };
        let flatbed_range = fix_range(
            raw_range(offset::FLATBED_X, offset::FLATBED_Y),
            valid(offset::FLATBED_X, offset::FLATBED_Y),
        );
        let transparency_range = fix_range(
            transparency_raw,
            valid(offset::TRANSPARENCY_X, offset::TRANSPARENCY_Y),
        );
        let adf_range = fix_range(
            raw_range(offset::ADF_X, offset::ADF_Y),
            valid(offset::ADF_X, offset::ADF_Y),
        );

        let color_modes = color_modes(&features, channels_per_pixel, bits_per_channel);
        let sources = source_modes(&features, class, quirks);

        Ok(Self {
            vendor,
            model,
            revision,
            class,
            asic,
            new_protocol,
            optical_res,
            max_res,
            channels_per_pixel,
            bits_per_channel,
            color_modes,
            sources,
            boundaries,
            line_difference,
            stripe_lines: asic.stripe_lines(),
            data_qualifier: if new_protocol { 0x0a0d } else { 0 },
            max_shading_target: be16(data, offset::MAX_SHADING_TARGET),
            flatbed_range,
            transparency_range,
            adf_range,
            features,
            quirks: quirks.clone(),
        })
    }

    /// Run the inquiry handshake and parse the result.
    #[instrument(skip_all)]
    pub fn query(
        t: &mut dyn Transport,
        quirks: &DeviceQuirks,
        area: AreaPolicy,
    ) -> Result<Self> {
        let standard = commands::inquiry(t, INQUIRY_STANDARD_LEN)?;
        let peripheral = standard[0] & 0x1f;
        if peripheral != PERIPHERAL_SCANNER {
            return Err(ScanError::Unsupported(format!(
                "peripheral type {peripheral:#04x} is not a scanner"
            )));
        }
        debug!(
            vendor = %ascii_field(&standard, offset::VENDOR),
            model = %ascii_field(&standard, offset::MODEL),
            "standard inquiry"
        );

        let mut data = commands::inquiry(t, INQUIRY_EXTENDED_LEN)?;
        let asic = AsicGeneration(data[offset::ASIC]);
        if asic.has_long_inquiry() {
            debug!(asic = asic.0, "reading long inquiry");
            data = commands::inquiry(t, INQUIRY_LONG_LEN)?;
        }

        let caps = Self::from_inquiry(&data, quirks, area)?;
        info!(
            vendor = %caps.vendor,
            model = %caps.model,
            class = ?caps.class,
            asic = caps.asic.0,
            optical_res = caps.optical_res,
            max_res = caps.max_res,
            "device capabilities"
        );
        Ok(caps)
    }

    pub fn supports_mode(&self, mode: ColorMode) -> bool {
        self.color_modes.contains(&mode)
    }

    pub fn supports_source(&self, source: SourceMode) -> bool {
        self.sources.contains(&source)
    }

    pub fn range(&self, dim: SourceDim) -> ScanRange {
        match dim {
            SourceDim::Flatbed => self.flatbed_range,
            SourceDim::Transparency => self.transparency_range,
            SourceDim::Adf => self.adf_range,
        }
    }

    /// Alignment the hardware pixel count must honour in `mode`.
    pub fn pixel_boundary(&self, mode: ColorMode) -> u32 {
        match mode {
            ColorMode::Color | ColorMode::Color12 | ColorMode::Color16 => self.boundaries.color,
            ColorMode::Gray | ColorMode::Gray12 | ColorMode::Gray16 => self.boundaries.gray,
            ColorMode::Dithered if self.asic == AsicGeneration::C5 => self.boundaries.dithered,
            ColorMode::Lineart if self.asic == AsicGeneration::C5 => self.boundaries.thresholded,
            ColorMode::Dithered | ColorMode::Lineart => 32,
        }
    }

    /// Whether sessions on this device calibrate by default.
    pub fn wants_calibration(&self) -> bool {
        self.new_protocol
            && self.features.needs_calibration
            && !self.quirks.no_calibration
            && self.class != ScannerClass::Film
    }
}

fn color_modes(features: &DeviceFeatures, channels: u8, bits: u8) -> Vec<ColorMode> {
    let mut modes = Vec::new();
    if !features.no_gray_modes {
        if bits > 0 {
            modes.push(ColorMode::Lineart);
            modes.push(ColorMode::Dithered);
        }
        if bits >= 8 {
            modes.push(ColorMode::Gray);
        }
        if bits == 12 {
            modes.push(ColorMode::Gray12);
        }
        if bits >= 16 {
            modes.push(ColorMode::Gray16);
        }
    }
    if channels > 1 {
        modes.push(ColorMode::Color);
        if bits == 12 {
            modes.push(ColorMode::Color12);
        }
        if bits >= 16 {
            modes.push(ColorMode::Color16);
        }
    }
    modes
}

fn source_modes(features: &DeviceFeatures, class: ScannerClass, quirks: &DeviceQuirks) -> Vec<SourceMode> {
    let mut sources = Vec::new();
    if class == ScannerClass::Sheetfed {
        sources.push(SourceMode::Adf);
    } else {
        sources.push(SourceMode::Flatbed);
        if features.light_box {
            sources.push(SourceMode::Transparency);
        }
        if features.adf {
            sources.push(SourceMode::Adf);
        }
    }
    if features.duplex {
        if features.duplex_interlaced && !quirks.no_rear {
            sources.push(SourceMode::AdfRear);
        }
        sources.push(SourceMode::AdfDuplex);
    }
    sources
}

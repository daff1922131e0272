// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Window configurator.
//
// Turns a scan request into hardware pixel geometry for one device, and that
// geometry into the SET WINDOW payload. Everything here is a pure function of
// its inputs.

use scanwerk_core::{
    ColorMode, MM_PER_INCH, Result, ScanError, ScanParameters, ScanRequest, SourceMode,
};
use scanwerk_transport::wire::{self, WindowDescriptor, bitset1, bitset2, bitset3, image_comp};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capabilities::{AsicGeneration, DeviceCapabilities, ScannerClass};

/// Hardware resolutions of C5 devices that rescale in software.
pub const HW_RES_LADDER_C5: &[u32] = &[75, 150, 300, 600, 1200, 2400, 4800];
/// Hardware resolutions of every other software-rescaled device.
pub const HW_RES_LADDER_GENERIC: &[u32] = &[50, 75, 150, 200, 300, 600, 1200, 2400, 4800];

/// Paper length announced to devices that take one, in window units.
const PAPER_LENGTH_UNITS: u16 = 30 * 1200;

/// Largest ladder entry not above `requested`.
pub fn hardware_resolution(ladder: &[u32], requested: u32) -> Option<u32> {
    ladder.iter().copied().filter(|&r| r <= requested).max()
}

/// Millimetres to whole pixels at `res`, truncating like the firmware does.
/// The epsilon keeps exact products such as 215.9 mm at 300 dpi from
/// truncating one pixel short.
fn mm_to_px(res: u32, mm: f64) -> u32 {
    let px = f64::from(res) * mm / MM_PER_INCH + 1e-6;
    if px <= 0.0 { 0 } else { px as u32 }
}

/// Geometry of one scan, in hardware pixels unless a field says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanGeometry {
    pub mode: ColorMode,
    pub source: SourceMode,
    /// Requested resolution.
    pub xres: u32,
    pub yres: u32,
    /// Resolution the device actually scans at.
    pub hw_xres: u32,
    pub hw_yres: u32,
    pub tlx: u32,
    pub tly: u32,
    pub brx: u32,
    pub bry: u32,
    /// Colour sub-scan skew in hardware lines.
    pub line_difference: u32,
    /// Lines the rear page trails the front in an interlaced pass.
    pub rear_offset: u32,
    pub interlaced_duplex: bool,
    pub film: bool,
    pub hw_pixels_per_line: u32,
    pub hw_bytes_per_line: u32,
    pub hw_lines: u32,
    /// Logical output geometry.
    pub pixels_per_line: u32,
    pub bytes_per_line: u32,
    pub lines: u32,
}

impl ScanGeometry {
    /// Derive the geometry of `req` on a device described by `caps`.
    pub fn compute(req: &ScanRequest, caps: &DeviceCapabilities) -> Result<Self> {
        if !caps.supports_mode(req.mode) {
            return Err(ScanError::Unsupported(format!(
                "{} mode not offered by this device",
                req.mode.label()
            )));
        }
        if !caps.supports_source(req.source) {
            return Err(ScanError::Unsupported(format!(
                "{} source not offered by this device",
                req.source.label()
            )));
        }
        if req.resolution == 0 || req.resolution > caps.max_res {
            return Err(ScanError::InvalidParameter(format!(
                "resolution {} outside 1..={}",
                req.resolution, caps.max_res
            )));
        }

        let range = caps.range(req.source.dim());
        let area = req.area;
        if area.tl_x < 0.0 || area.tl_y < 0.0 || area.width() <= 0.0 || area.height() <= 0.0 {
            return Err(ScanError::InvalidParameter(format!(
                "empty or negative scan area {area:?}"
            )));
        }
        if area.br_x > range.x_mm + 1e-6 || area.br_y > range.y_mm + 1e-6 {
            return Err(ScanError::InvalidParameter(format!(
                "scan area {area:?} exceeds {:.1} x {:.1} mm",
                range.x_mm, range.y_mm
            )));
        }

        let (xres, yres) = (req.resolution, req.resolution);
        let (hw_xres, hw_yres) = if caps.quirks.soft_scale {
            let ladder = if caps.asic == AsicGeneration::C5 {
                HW_RES_LADDER_C5
            } else {
                HW_RES_LADDER_GENERIC
            };
            let hw_x = hardware_resolution(ladder, xres);
            let hw_y = hardware_resolution(ladder, yres);
            match (hw_x, hw_y) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    return Err(ScanError::InvalidParameter(format!(
                        "no hardware resolution at or below {xres} dpi"
                    )));
                }
            }
        } else {
            (xres, yres)
        };

        let tlx = mm_to_px(hw_xres, area.tl_x);
        let tly = mm_to_px(hw_yres, area.tl_y);
        let brx = mm_to_px(hw_xres, area.br_x);
        let mut bry = mm_to_px(hw_yres, area.br_y);

        let line_difference = if req.mode.is_color()
            && caps.features.needs_software_colorpack
            && caps.line_difference > 0
        {
            let ld = caps.line_difference * hw_yres / caps.optical_res;
            bry += 2 * ld;
            let y_max = mm_to_px(hw_yres, range.y_mm);
            if bry + 2 * ld > y_max {
                bry = y_max.saturating_sub(2 * ld);
            }
            ld
        } else {
            0
        };

        if caps.features.tune_scan_length && req.source.is_adf() {
            let overscan = (f64::from(hw_yres) * (req.overscan_top + req.overscan_bottom)
                + (MM_PER_INCH - 1.0))
                / MM_PER_INCH;
            bry += overscan.max(0.0) as u32;
        }

        let interlaced_duplex =
            req.source == SourceMode::AdfDuplex && caps.features.duplex_interlaced;
        let rear_offset = if interlaced_duplex && caps.quirks.rear_offset {
            hw_yres / 2
        } else {
            0
        };
        let film = caps.class == ScannerClass::Film;

        let boundary = caps.pixel_boundary(req.mode).max(1);
        let mut hw_pixels_per_line = brx.saturating_sub(tlx);
        hw_pixels_per_line -= hw_pixels_per_line % boundary;

        let mut hw_lines = bry.saturating_sub(tly).saturating_sub(2 * line_difference);
        if interlaced_duplex && !film {
            hw_lines -= hw_lines % caps.stripe_lines.max(1);
        }
        if hw_pixels_per_line == 0 || hw_lines == 0 {
            return Err(ScanError::InvalidParameter(format!(
                "scan area {area:?} is smaller than one {boundary}-pixel unit at {hw_xres} dpi"
            )));
        }

        let mut pixels_per_line = hw_pixels_per_line * xres / hw_xres;
        let lines = hw_lines * yres / hw_yres;
        if req.mode.is_binary() {
            pixels_per_line -= pixels_per_line % 8;
        }
        let hw_bytes_per_line = line_bytes(req.mode, hw_pixels_per_line);
        let bytes_per_line = line_bytes(req.mode, pixels_per_line);

        let geometry = Self {
            mode: req.mode,
            source: req.source,
            xres,
            yres,
            hw_xres,
            hw_yres,
            tlx,
            tly,
            brx,
            bry,
            line_difference,
            rear_offset,
            interlaced_duplex,
            film,
            hw_pixels_per_line,
            hw_bytes_per_line,
            hw_lines,
            pixels_per_line,
            bytes_per_line,
            lines,
        };
        debug!(?geometry, "computed scan geometry");
        Ok(geometry)
    }

    /// Consumer-facing parameters. Feeder scans report an unknown length.
    pub fn parameters(&self) -> ScanParameters {
        ScanParameters {
            format: self.mode.frame_format(),
            last_frame: true,
            pixels_per_line: self.pixels_per_line,
            lines: if self.source.is_adf() {
                -1
            } else {
                self.lines as i32
            },
            bytes_per_line: self.bytes_per_line,
            depth: self.mode.depth(),
        }
    }

    pub fn needs_rescale(&self) -> bool {
        self.xres != self.hw_xres || self.yres != self.hw_yres
    }

    /// Raw lines one side of the page occupies in the device stream.
    pub fn lines_per_side(&self) -> u32 {
        self.hw_lines + 2 * self.line_difference + self.rear_offset
    }

    /// Build the SET WINDOW payload for this geometry.
    pub fn window(&self, caps: &DeviceCapabilities, adf_flip: bool) -> WindowDescriptor {
        let base_abs = wire::WINDOW_BASE_DPI;
        let base_rel = if caps.asic == AsicGeneration::C5 {
            let rounded = self.hw_xres - self.hw_xres % 300;
            if rounded > caps.optical_res {
                caps.optical_res
            } else if self.hw_xres <= 150 {
                150
            } else {
                rounded
            }
        } else {
            base_abs
        };

        let mut line_count = self.lines_per_side();
        let length = line_count * base_rel / self.hw_yres + 1;
        if self.interlaced_duplex && !self.film {
            line_count *= 2;
        }

        let mut set1 = bitset1::USE_LINE_GEOMETRY;
        let mut set3 = 0;
        if self.source.is_adf() {
            set1 |= bitset1::ADF;
            if caps.features.duplex_interlaced {
                match self.source {
                    SourceMode::AdfRear => set3 |= bitset3::REAR,
                    SourceMode::AdfDuplex => set3 |= bitset3::INTERLACED_DUPLEX,
                    _ => {}
                }
            } else if self.source == SourceMode::AdfDuplex {
                set3 |= bitset3::DUPLEX | bitset3::MIRROR_REAR;
                if adf_flip {
                    set3 |= bitset3::FLIP;
                }
            }
        }
        if self.mode.is_color() {
            set1 |= bitset1::FILTER_RGB;
        }
        let set2 = if self.source.dim() == scanwerk_core::SourceDim::Transparency {
            bitset2::TRANSPARENCY
        } else {
            0
        };

        let (comp, bpc) = match self.mode {
            ColorMode::Lineart => (image_comp::LINEART, 1),
            ColorMode::Dithered => (image_comp::DITHERED, 1),
            ColorMode::Gray => (image_comp::GRAY, 8),
            ColorMode::Gray12 => (image_comp::GRAY, 12),
            ColorMode::Gray16 => (image_comp::GRAY, 16),
            ColorMode::Color => (image_comp::COLOR, 8),
            ColorMode::Color12 => (image_comp::COLOR, 12),
            ColorMode::Color16 => (image_comp::COLOR, 16),
        };

        WindowDescriptor {
            xres: self.hw_xres as u16,
            yres: self.hw_yres as u16,
            ulx: self.tlx * base_abs / self.hw_xres,
            uly: self.tly * base_abs / self.hw_yres,
            width: self.hw_pixels_per_line * base_rel / self.hw_xres + 1,
            length,
            image_comp: comp,
            bits_per_channel: bpc,
            bitset1: set1,
            line_width: self.hw_bytes_per_line,
            line_count,
            paper_length: if caps.features.paper_length {
                PAPER_LENGTH_UNITS
            } else {
                0
            },
            extended: caps.new_protocol,
            bitset2: set2,
            bitset3: set3,
            background_lines: 0,
        }
    }
}

/// Bytes per line; 1-bit lines hold whole bytes only.
fn line_bytes(mode: ColorMode, pixels: u32) -> u32 {
    if mode.is_binary() {
        pixels / 8
    } else {
        mode.bytes_per_line(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        DeviceFeatures, DeviceQuirks, PixelBoundaries, ScanRange,
    };
    use scanwerk_core::ScanArea;

    fn caps() -> DeviceCapabilities {
        DeviceCapabilities {
            vendor: "AVISION".into(),
            model: "AV-TEST".into(),
            revision: "1.0".into(),
            class: ScannerClass::Flatbed,
            asic: AsicGeneration::C6,
            new_protocol: true,
            optical_res: 600,
            max_res: 1200,
            channels_per_pixel: 3,
            bits_per_channel: 16,
            color_modes: ColorMode::ALL.to_vec(),
            sources: vec![
                SourceMode::Flatbed,
                SourceMode::Adf,
                SourceMode::AdfRear,
                SourceMode::AdfDuplex,
            ],
            boundaries: PixelBoundaries {
                color: 8,
                gray: 8,
                dithered: 32,
                thresholded: 32,
            },
            line_difference: 0,
            stripe_lines: 32,
            data_qualifier: 0x0a0d,
            max_shading_target: 0,
            flatbed_range: ScanRange {
                x_mm: 216.0,
                y_mm: 297.0,
            },
            transparency_range: ScanRange { x_mm: 0.0, y_mm: 0.0 },
            adf_range: ScanRange {
                x_mm: 216.0,
                y_mm: 356.0,
            },
            features: DeviceFeatures::default(),
            quirks: DeviceQuirks::default(),
        }
    }

    fn letter(mode: ColorMode, res: u32) -> ScanRequest {
        ScanRequest {
            resolution: res,
            area: ScanArea::new(0.0, 0.0, 215.9, 279.4),
            mode,
            ..ScanRequest::default()
        }
    }

    #[test]
    fn full_page_color_at_300_dpi() {
        let g = ScanGeometry::compute(&letter(ColorMode::Color, 300), &caps()).unwrap();
        assert_eq!(g.hw_xres, 300);
        assert_eq!(g.pixels_per_line, 2550 - 2550 % 8);
        assert_eq!(g.bytes_per_line, g.pixels_per_line * 3);
        assert_eq!(g.lines, 3300);
        let p = g.parameters();
        assert_eq!(p.lines, 3300);
        assert_eq!(p.depth, 8);
        assert!(!g.needs_rescale());
    }

    #[test]
    fn rescaling_only_when_hardware_resolution_differs() {
        let mut c = caps();
        c.quirks.soft_scale = true;
        for res in [75, 150, 300, 600] {
            let g = ScanGeometry::compute(&letter(ColorMode::Gray, res), &c).unwrap();
            assert_eq!(g.hw_xres, res);
            assert!(!g.needs_rescale(), "{res} dpi is on the ladder");
        }
        let g = ScanGeometry::compute(&letter(ColorMode::Gray, 250), &c).unwrap();
        assert_eq!(g.hw_xres, 200);
        assert!(g.needs_rescale());
    }

    #[test]
    fn ladder_never_exceeds_request() {
        for ladder in [HW_RES_LADDER_C5, HW_RES_LADDER_GENERIC] {
            for requested in 1..=4800 {
                if let Some(hw) = hardware_resolution(ladder, requested) {
                    assert!(hw <= requested);
                    assert!(ladder.contains(&hw));
                }
            }
        }
        assert_eq!(hardware_resolution(HW_RES_LADDER_GENERIC, 250), Some(200));
        assert_eq!(hardware_resolution(HW_RES_LADDER_C5, 60), None);
    }

    #[test]
    fn hardware_pixels_honour_boundary_for_every_mode() {
        let mut c = caps();
        c.quirks.soft_scale = true;
        c.boundaries.color = 12;
        for mode in ColorMode::ALL {
            for res in [75, 100, 150, 220, 300, 600, 1200] {
                let g = ScanGeometry::compute(&letter(mode, res), &c).unwrap();
                assert_eq!(g.hw_pixels_per_line % c.pixel_boundary(mode), 0);
                assert!(g.hw_xres <= res);
            }
        }
    }

    #[test]
    fn soft_scale_without_match_is_invalid() {
        let mut c = caps();
        c.quirks.soft_scale = true;
        c.asic = AsicGeneration::C5;
        let err = ScanGeometry::compute(&letter(ColorMode::Gray, 60), &c).unwrap_err();
        assert_eq!(err.kind(), scanwerk_core::ErrorKind::InvalidParameter);
    }

    #[test]
    fn software_colorpack_adds_line_difference() {
        let mut c = caps();
        c.features.needs_software_colorpack = true;
        c.line_difference = 16;
        let req = ScanRequest {
            resolution: 300,
            area: ScanArea::new(0.0, 0.0, 100.0, 100.0),
            mode: ColorMode::Color,
            ..ScanRequest::default()
        };
        let g = ScanGeometry::compute(&req, &c).unwrap();
        assert_eq!(g.line_difference, 8);
        assert_eq!(g.hw_lines, mm_to_px(300, 100.0));
        assert_eq!(g.lines_per_side(), g.hw_lines + 16);

        // Gray never needs colour packing.
        let gray = ScanGeometry::compute(&ScanRequest { mode: ColorMode::Gray, ..req }, &c).unwrap();
        assert_eq!(gray.line_difference, 0);
    }

    #[test]
    fn interlaced_duplex_rounds_to_stripes_and_adds_rear_offset() {
        let mut c = caps();
        c.features.duplex = true;
        c.features.duplex_interlaced = true;
        c.quirks.rear_offset = true;
        let req = ScanRequest {
            source: SourceMode::AdfDuplex,
            ..letter(ColorMode::Gray, 300)
        };
        let g = ScanGeometry::compute(&req, &c).unwrap();
        assert!(g.interlaced_duplex);
        assert_eq!(g.hw_lines % 32, 0);
        assert_eq!(g.rear_offset, 150);
        assert_eq!(g.parameters().lines, -1);

        let w = g.window(&c, false);
        assert_eq!(w.line_count, 2 * (g.hw_lines + 150));
        assert_eq!(w.bitset3, bitset3::INTERLACED_DUPLEX);
        assert_ne!(w.bitset1 & bitset1::ADF, 0);
    }

    #[test]
    fn overscan_extends_feeder_scans() {
        let mut c = caps();
        c.features.tune_scan_length = true;
        let base = ScanRequest {
            source: SourceMode::Adf,
            ..letter(ColorMode::Gray, 300)
        };
        let plain = ScanGeometry::compute(&base, &c).unwrap();
        let over = ScanGeometry::compute(
            &ScanRequest {
                overscan_top: 2.0,
                overscan_bottom: 2.0,
                ..base
            },
            &c,
        )
        .unwrap();
        assert_eq!(over.hw_lines - plain.hw_lines, 48);
    }

    #[test]
    fn lineart_counts_whole_bytes() {
        let g = ScanGeometry::compute(&letter(ColorMode::Lineart, 300), &caps()).unwrap();
        assert_eq!(g.pixels_per_line % 8, 0);
        assert_eq!(g.bytes_per_line, g.pixels_per_line / 8);
        assert_eq!(g.hw_pixels_per_line % 32, 0);
    }

    #[test]
    fn unsupported_mode_and_bad_area_are_rejected() {
        let mut c = caps();
        c.color_modes = vec![ColorMode::Gray];
        let err = ScanGeometry::compute(&letter(ColorMode::Color, 300), &c).unwrap_err();
        assert_eq!(err.kind(), scanwerk_core::ErrorKind::Unsupported);

        let req = ScanRequest {
            area: ScanArea::new(10.0, 10.0, 10.0, 50.0),
            ..letter(ColorMode::Gray, 300)
        };
        let err = ScanGeometry::compute(&req, &c).unwrap_err();
        assert_eq!(err.kind(), scanwerk_core::ErrorKind::InvalidParameter);
    }

    #[test]
    fn window_encodes_positions_in_base_units() {
        let c = caps();
        let req = ScanRequest {
            resolution: 300,
            area: ScanArea::new(25.4, 50.8, 127.0, 152.4),
            mode: ColorMode::Color16,
            ..ScanRequest::default()
        };
        let g = ScanGeometry::compute(&req, &c).unwrap();
        let w = g.window(&c, false);
        assert_eq!(w.ulx, 1200);
        assert_eq!(w.uly, 2400);
        assert_eq!(w.width, g.hw_pixels_per_line * 1200 / 300 + 1);
        assert_eq!(w.image_comp, image_comp::COLOR);
        assert_eq!(w.bits_per_channel, 16);
        assert_eq!(w.line_width, g.hw_pixels_per_line * 6);
        assert!(w.extended);
        assert_ne!(w.bitset1 & bitset1::FILTER_RGB, 0);
    }

    #[test]
    fn flipping_duplex_window_bits() {
        let mut c = caps();
        c.features.duplex = true;
        let req = ScanRequest {
            source: SourceMode::AdfDuplex,
            ..letter(ColorMode::Gray, 300)
        };
        let g = ScanGeometry::compute(&req, &c).unwrap();
        assert!(!g.interlaced_duplex);
        let w = g.window(&c, true);
        assert_eq!(
            w.bitset3,
            bitset3::DUPLEX | bitset3::FLIP | bitset3::MIRROR_REAR
        );
    }
}

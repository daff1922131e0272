// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shading tables: outlier-rejecting averages of reference lines, turned into
// per-element dark offsets and white multipliers.

use scanwerk_core::{Result, ScanError};
use scanwerk_transport::command::data_type;
use scanwerk_transport::{CalibrationFormat, Transport};
use tracing::{debug, warn};

use crate::capabilities::DeviceQuirks;
use crate::commands;

pub const INVALID_WHITE: u16 = 0x0000;
pub const DEFAULT_WHITE: u16 = 0xfff0;
pub const MAX_WHITE: u16 = 0xffff;
/// White multiplier meaning "gain 1.0".
pub const WHITE_MAP_RANGE: u16 = 0x4fff;
pub const INVALID_DARK: u16 = 0xffff;
pub const DEFAULT_DARK: u16 = 0x0000;

mod upload_qualifier {
    pub const COLOR: u16 = 0x12;
    pub const GRAY: u16 = 0x11;
    pub const GRAY_ON_BLUE: u16 = 0x02;
}

/// How reference data for one calibration pass is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadingLayout {
    pub pixels: usize,
    pub channels: usize,
    /// Reference lines per element.
    pub lines: usize,
    pub bytes_per_channel: usize,
}

impl ShadingLayout {
    /// Colour passes (and devices wanting dark shading) report the line count
    /// of all three channels together.
    pub fn new(format: &CalibrationFormat, color: bool) -> Self {
        let (channels, lines) = if color || format.needs_dark() {
            (3, usize::from(format.lines) / 3)
        } else {
            (1, usize::from(format.lines))
        };
        Self {
            pixels: usize::from(format.pixels_per_line),
            channels,
            lines,
            bytes_per_channel: usize::from(format.bytes_per_channel).max(1),
        }
    }

    pub fn elements(&self) -> usize {
        self.pixels * self.channels
    }

    pub fn line_bytes(&self) -> usize {
        self.elements() * self.bytes_per_channel
    }

    pub fn data_len(&self) -> usize {
        self.line_bytes() * self.lines
    }
}

/// Drop the lowest third of `samples` and average the rest.
pub fn rejecting_average(samples: &mut [u16]) -> u16 {
    let drop = samples.len() / 3;
    samples.sort_unstable();
    let kept = &samples[drop..];
    if kept.is_empty() {
        return 0;
    }
    let sum: u64 = kept.iter().map(|&v| u64::from(v)).sum();
    (sum / kept.len() as u64) as u16
}

/// Per-element average over all reference lines. 8-bit samples are widened
/// to 16 bits; 16-bit samples arrive little-endian.
pub fn sort_and_average(layout: &ShadingLayout, data: &[u8]) -> Result<Vec<u16>> {
    if data.len() < layout.data_len() {
        return Err(ScanError::Io(format!(
            "calibration data short: {} of {} bytes",
            data.len(),
            layout.data_len()
        )));
    }
    let stride = layout.line_bytes();
    let bpc = layout.bytes_per_channel;
    let mut column = vec![0u16; layout.lines];
    let mut out = Vec::with_capacity(layout.elements());
    for element in 0..layout.elements() {
        for (line, slot) in column.iter_mut().enumerate() {
            let at = line * stride + element * bpc;
            *slot = match data.get(at..at + bpc) {
                Some([v]) => (0xffff * u32::from(*v) / 255) as u16,
                Some([lo, hi, ..]) => u16::from_le_bytes([*lo, *hi]),
                _ => 0,
            };
        }
        out.push(rejecting_average(&mut column));
    }
    Ok(out)
}

/// Per-channel targets; gray passes use the green target everywhere.
fn spread_gray(mut targets: [u16; 3], channels: usize) -> [u16; 3] {
    if channels == 1 {
        targets = [targets[1]; 3];
    }
    targets
}

/// Subtract the dark target from every averaged dark element, flooring at 0.
pub fn compute_dark(
    avg: &[u16],
    format: &CalibrationFormat,
    channels: usize,
    max_shading_target: u16,
) -> Vec<u16> {
    let map = if max_shading_target != INVALID_DARK {
        max_shading_target << 8
    } else {
        DEFAULT_DARK
    };
    let mut targets = format.dark_targets;
    for t in targets.iter_mut().take(channels) {
        if *t == INVALID_DARK {
            *t = map;
        }
    }
    let targets = spread_gray(targets, channels);
    avg.iter()
        .enumerate()
        .map(|(i, &v)| v.saturating_sub(targets[i % 3]))
        .collect()
}

/// White multipliers scaled so that `WHITE_MAP_RANGE` means unity.
pub fn compute_white(
    avg: &[u16],
    format: &CalibrationFormat,
    channels: usize,
    max_shading_target: u16,
) -> Vec<u16> {
    let inquiry_target = if max_shading_target != INVALID_WHITE {
        max_shading_target << 4
    } else {
        DEFAULT_WHITE
    };
    let mut targets = format.white_targets;
    for (c, t) in targets.iter_mut().enumerate() {
        if *t == INVALID_WHITE {
            *t = inquiry_target;
        } else if *t < 0x110 {
            // Some firmware reports the target byte-swapped.
            *t = t.swap_bytes();
        }
        if *t < DEFAULT_WHITE / 2 {
            debug!(channel = c, target = *t, "white target too low, using default");
            *t = DEFAULT_WHITE;
        }
    }
    let targets = spread_gray(targets, channels);

    let mut invalid = 0usize;
    let mut clipped = 0usize;
    let table = avg
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let v = if v == INVALID_WHITE {
                invalid += 1;
                DEFAULT_WHITE
            } else {
                v
            };
            let result =
                f64::from(targets[i % 3]) * f64::from(WHITE_MAP_RANGE) / (f64::from(v) + 0.5);
            if result > f64::from(MAX_WHITE) {
                clipped += 1;
                WHITE_MAP_RANGE
            } else {
                result as u16
            }
        })
        .collect();
    if invalid > 0 || clipped > 0 {
        warn!(invalid, clipped, "white shading values replaced");
    }
    table
}

/// Fold the top six bits of each dark value into the low bits of the white
/// value, for devices that take both in one table.
pub fn merge_dark(white: &mut [u16], dark: &[u16]) {
    for (w, d) in white.iter_mut().zip(dark) {
        *w = (*w & 0xffc0) | ((d >> 10) & 0x3f);
    }
}

fn le_bytes(values: impl Iterator<Item = u16>) -> Vec<u8> {
    values.flat_map(u16::to_le_bytes).collect()
}

/// Send the white table, in one command or one per channel.
pub fn upload(
    t: &mut dyn Transport,
    format: &CalibrationFormat,
    layout: &ShadingLayout,
    white: &[u16],
    quirks: &DeviceQuirks,
) -> Result<()> {
    let single = layout.channels == 1
        || ((quirks.one_calib_cmd || !format.multi_command()) && !quirks.multi_calib_cmd);
    if single {
        let qualifier = if layout.channels > 1 {
            upload_qualifier::COLOR
        } else if quirks.gray_calib_blue {
            upload_qualifier::GRAY_ON_BLUE
        } else {
            upload_qualifier::GRAY
        };
        debug!(qualifier, elements = white.len(), "uploading shading table");
        return commands::send_data(
            t,
            data_type::CALIB_UPLOAD,
            qualifier,
            &le_bytes(white.iter().copied()),
        );
    }
    for channel in 0..3 {
        let plane = (0..layout.pixels).map(|p| white.get(p * 3 + channel).copied().unwrap_or(0));
        debug!(channel, "uploading shading plane");
        commands::send_data(t, data_type::CALIB_UPLOAD, channel as u16, &le_bytes(plane))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> CalibrationFormat {
        CalibrationFormat {
            pixels_per_line: 4,
            bytes_per_channel: 2,
            lines: 9,
            flags: 1,
            ability: 0,
            gains: [0; 3],
            white_targets: [0xf000, 0xe000, 0xd000],
            dark_targets: [0x0100, 0x0200, INVALID_DARK],
        }
    }

    #[test]
    fn rejecting_average_drops_lowest_third() {
        let mut s = vec![1, 100, 100, 2, 100, 100];
        assert_eq!(rejecting_average(&mut s), 100);
        assert_eq!(rejecting_average(&mut []), 0);
        assert_eq!(rejecting_average(&mut [7, 9]), 8);
    }

    #[test]
    fn average_ignores_line_order() {
        let layout = ShadingLayout {
            pixels: 2,
            channels: 1,
            lines: 6,
            bytes_per_channel: 2,
        };
        let values: [u16; 6] = [900, 100, 500, 700, 300, 800];
        let build = |order: &[usize]| -> Vec<u8> {
            order
                .iter()
                .flat_map(|&i| {
                    let v = values[i];
                    [v.to_le_bytes(), (v / 2).to_le_bytes()].concat()
                })
                .collect()
        };
        let a = sort_and_average(&layout, &build(&[0, 1, 2, 3, 4, 5])).unwrap();
        let b = sort_and_average(&layout, &build(&[5, 3, 1, 0, 4, 2])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0], (500 + 700 + 800 + 900) / 4);
    }

    #[test]
    fn one_bright_outlier_moves_average_by_at_most_one_line() {
        let layout = ShadingLayout {
            pixels: 3,
            channels: 1,
            lines: 9,
            bytes_per_channel: 1,
        };
        let base: Vec<u8> = (0..9).flat_map(|l| [120 + l as u8, 130, 140]).collect();
        let clean = sort_and_average(&layout, &base).unwrap();

        let mut noisy = base.clone();
        noisy[..3].copy_from_slice(&[0xff, 0xff, 0xff]);
        let dirty = sort_and_average(&layout, &noisy).unwrap();

        let kept = (9 - 9 / 3) as u16;
        for (c, d) in clean.iter().zip(&dirty) {
            assert!(d.abs_diff(*c) <= 0xffff / kept, "{c} -> {d}");
        }
    }

    #[test]
    fn eight_bit_samples_widen() {
        let layout = ShadingLayout {
            pixels: 1,
            channels: 1,
            lines: 1,
            bytes_per_channel: 1,
        };
        assert_eq!(sort_and_average(&layout, &[255]).unwrap(), vec![0xffff]);
        assert!(sort_and_average(&layout, &[]).is_err());
    }

    #[test]
    fn layout_splits_color_lines() {
        let mut f = format();
        let color = ShadingLayout::new(&f, true);
        assert_eq!((color.channels, color.lines), (3, 3));
        let gray = ShadingLayout::new(&f, false);
        assert_eq!((gray.channels, gray.lines), (1, 9));
        f.ability = scanwerk_transport::wire::calib_ability::NEEDS_DARK;
        assert_eq!(ShadingLayout::new(&f, false).channels, 3);
    }

    #[test]
    fn dark_subtracts_targets_with_floor() {
        let avg = [0x0300, 0x0300, 0x0300, 0x0050, 0x0050, 0x0050];
        let dark = compute_dark(&avg, &format(), 3, 0x0002);
        // Blue target invalid: inquiry target << 8.
        assert_eq!(dark, vec![0x0200, 0x0100, 0x0100, 0, 0, 0]);
    }

    #[test]
    fn white_scales_to_map_range_and_clamps() {
        let f = format();
        let avg = [0xf000, 0xe000, 0xd000, 0, 0x0100, 0x1000];
        let white = compute_white(&avg, &f, 3, 0);
        assert_eq!(white[0], (0xf000 as f64 * 0x4fff as f64 / (0xf000 as f64 + 0.5)) as u16);
        // Invalid sample replaced by the default.
        assert_eq!(
            white[3],
            (0xf000 as f64 * 0x4fff as f64 / (0xfff0 as f64 + 0.5)) as u16
        );
        // Over-amplification clamps to unity.
        assert_eq!(white[4], WHITE_MAP_RANGE);
    }

    #[test]
    fn white_targets_fall_back() {
        let mut f = format();
        f.white_targets = [INVALID_WHITE, 0x00f0, 0x1000];
        let white = compute_white(&[0x8000, 0x8000, 0x8000], &f, 3, 0x0fff);
        let expect = |t: u16| (f64::from(t) * f64::from(WHITE_MAP_RANGE) / 32768.5) as u16;
        assert_eq!(white[0], expect(0xfff0));
        // 0x00f0 swapped is 0xf000.
        assert_eq!(white[1], expect(0xf000));
        // Too low: default.
        assert_eq!(white[2], expect(DEFAULT_WHITE));
    }

    #[test]
    fn gray_uses_green_target() {
        let f = format();
        let white = compute_white(&[0x8000, 0x8000], &f, 1, 0);
        assert_eq!(white[0], white[1]);
        assert_eq!(
            white[0],
            (f64::from(0xe000u16) * f64::from(WHITE_MAP_RANGE) / 32768.5) as u16
        );
    }

    #[test]
    fn merge_keeps_white_high_bits() {
        let mut white = [0xffff, 0x1234];
        merge_dark(&mut white, &[0xfc00, 0x0400]);
        assert_eq!(white, [0xffff, 0x1201]);
    }
}

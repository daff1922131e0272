// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw image passes as the virtual sensor produces them.
//
// Each page is a deterministic test pattern. The firmware then applies what a
// real device does to it on the way out: right-to-left feeder lines, planar
// colour, channel skew by the colour line difference, duplex interlacing and
// the reversed line order of a turned-over sheet. A correct reader undoes all
// of it and gets the pattern back.

use scanwerk_transport::wire::{WindowDescriptor, bitset1, image_comp};

use crate::profile::SimProfile;

/// Which side of the sheet a line shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Rear,
}

/// Pattern value of channel `c` at pixel `x` of page line `y`.
pub fn pattern(side: Side, x: u32, y: u32, c: u32) -> u8 {
    let v = x
        .wrapping_mul(3)
        .wrapping_add(y.wrapping_mul(5))
        .wrapping_add(c * 85) as u8;
    match side {
        Side::Front => v,
        Side::Rear => v ^ 0x80,
    }
}

/// Lineart pattern: eight-pixel blocks alternating per byte and per line.
pub fn lineart_byte(side: Side, byte: u32, y: u32) -> u8 {
    let black = (byte + y) % 2 == 0;
    if black != (side == Side::Rear) { 0xff } else { 0x00 }
}

/// 16-bit wire value for a pattern byte.
pub fn wide_sample(v: u8, twelve_bit: bool) -> u16 {
    if twelve_bit {
        (u16::from(v) << 4) | u16::from(v >> 4)
    } else {
        u16::from(v) * 257
    }
}

/// Line layout of one pass, derived from the window the host set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PassFormat {
    binary: bool,
    channels: usize,
    sample_bytes: usize,
    twelve_bit: bool,
    bpl: usize,
    pixels: usize,
    mirror: bool,
    bgr: bool,
    /// Colour line difference in raw lines.
    skew: usize,
    planar: bool,
}

impl PassFormat {
    pub(crate) fn new(w: &WindowDescriptor, profile: &SimProfile) -> Self {
        let binary = matches!(w.image_comp, image_comp::LINEART | image_comp::DITHERED);
        let color = w.image_comp == image_comp::COLOR;
        let channels = if color { 3 } else { 1 };
        let sample_bytes = if w.bits_per_channel > 8 { 2 } else { 1 };
        let bpl = w.line_width as usize;
        let pixels = if binary {
            bpl * 8
        } else {
            bpl / (channels * sample_bytes)
        };
        let mirror = w.bitset1 & bitset1::ADF != 0 && profile.adf_mirror;
        let ld = profile.sensor_line_difference();
        let skew = if color && profile.software_colorpack && ld > 0 {
            (ld * u32::from(w.yres) / u32::from(profile.optical_res.max(1))) as usize
        } else {
            0
        };
        Self {
            binary,
            channels,
            sample_bytes,
            twelve_bit: w.bits_per_channel == 12,
            bpl,
            pixels,
            mirror,
            bgr: mirror && color && profile.adf_bgr,
            skew,
            planar: color && profile.line_pack && skew == 0,
        }
    }

    pub(crate) fn line_bytes(&self) -> usize {
        self.bpl
    }

    pub(crate) fn skew(&self) -> usize {
        self.skew
    }

    /// Page line `y` in host order: left to right, interleaved RGB.
    fn logical(&self, side: Side, y: i64) -> Vec<u8> {
        let mut line = vec![0u8; self.bpl];
        if y < 0 {
            return line;
        }
        let y = y as u32;
        if self.binary {
            for (i, b) in line.iter_mut().enumerate() {
                *b = lineart_byte(side, i as u32, y);
            }
            return line;
        }
        let mut at = 0;
        for x in 0..self.pixels as u32 {
            for c in 0..self.channels as u32 {
                let v = pattern(side, x, y, c);
                if self.sample_bytes == 1 {
                    line[at] = v;
                } else {
                    line[at..at + 2].copy_from_slice(&wide_sample(v, self.twelve_bit).to_le_bytes());
                }
                at += self.sample_bytes;
            }
        }
        line
    }

    /// Page line `y` as the sensor sees it, before channel skew.
    fn sensed(&self, side: Side, y: i64) -> Vec<u8> {
        let mut line = self.logical(side, y);
        if self.mirror {
            if self.binary {
                line.reverse();
                for b in &mut line {
                    *b = b.reverse_bits();
                }
            } else {
                let unit = if self.bgr {
                    self.sample_bytes
                } else {
                    self.channels * self.sample_bytes
                };
                reverse_units(&mut line, unit);
            }
        }
        if self.planar {
            line = to_planar(&line, self.pixels, self.sample_bytes);
        }
        line
    }

    /// Raw line `k` of one side. Lines before the page start are blank.
    pub(crate) fn raw_line(&self, side: Side, k: i64) -> Vec<u8> {
        if self.skew == 0 {
            return self.sensed(side, k);
        }
        let sources: Vec<Vec<u8>> = (0..3)
            .map(|c| self.sensed(side, k - (c * self.skew) as i64))
            .collect();
        (0..self.bpl)
            .map(|i| sources[(i / self.sample_bytes) % 3][i])
            .collect()
    }
}

fn reverse_units(line: &mut [u8], unit: usize) {
    let unit = unit.max(1);
    let reversed: Vec<u8> = line.chunks_exact(unit).rev().flatten().copied().collect();
    line[..reversed.len()].copy_from_slice(&reversed);
}

fn to_planar(line: &[u8], pixels: usize, sample_bytes: usize) -> Vec<u8> {
    let plane = pixels * sample_bytes;
    let mut out = vec![0u8; line.len()];
    for p in 0..pixels {
        for c in 0..3 {
            let src = (p * 3 + c) * sample_bytes;
            let dst = c * plane + p * sample_bytes;
            out[dst..dst + sample_bytes].copy_from_slice(&line[src..src + sample_bytes]);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Duplex interlacing
// ---------------------------------------------------------------------------

/// How the firmware mixes the two sides of an interlaced pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interlace {
    Stripe(u64),
    Half(u64),
    Line,
}

impl Interlace {
    pub(crate) fn for_pass(w: &WindowDescriptor, profile: &SimProfile, skew: usize) -> Self {
        let total = u64::from(w.line_count);
        if profile.quirks.film_scanner || profile.quirks.second_line_interlaced {
            Self::Line
        } else if profile.quirks.non_interlaced_duplex_300 && w.xres <= 300 && w.yres <= 300 {
            Self::Half(total)
        } else {
            Self::Stripe(u64::from(profile.stripe_lines()) + 2 * skew as u64)
        }
    }

    fn is_rear(self, abs: u64) -> bool {
        match self {
            Self::Stripe(lps) => abs % (2 * lps.max(1)) >= lps.max(1),
            Self::Half(total) => abs >= total / 2,
            Self::Line => abs % 2 == 1,
        }
    }

    pub(crate) fn merge(self, front: Vec<Vec<u8>>, rear: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let total = (front.len() + rear.len()) as u64;
        let (mut f, mut r) = (front.into_iter(), rear.into_iter());
        (0..total)
            .filter_map(|abs| {
                if self.is_rear(abs) {
                    r.next().or_else(|| f.next())
                } else {
                    f.next().or_else(|| r.next())
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(comp: u8, bpc: u8, bpl: u32) -> WindowDescriptor {
        WindowDescriptor {
            xres: 300,
            yres: 300,
            image_comp: comp,
            bits_per_channel: bpc,
            line_width: bpl,
            line_count: 10,
            ..WindowDescriptor::default()
        }
    }

    #[test]
    fn gray_line_is_the_pattern() {
        let fmt = PassFormat::new(&window(image_comp::GRAY, 8, 4), &SimProfile::flatbed());
        let line = fmt.raw_line(Side::Front, 2);
        let want: Vec<u8> = (0..4).map(|x| pattern(Side::Front, x, 2, 0)).collect();
        assert_eq!(line, want);
    }

    #[test]
    fn colour_skew_delays_green_and_blue() {
        let profile = SimProfile::flatbed();
        let fmt = PassFormat::new(&window(image_comp::COLOR, 8, 6), &profile);
        // 8 sensor rows at 600 dpi optical become 4 raw lines at 300 dpi.
        assert_eq!(fmt.skew(), 4);
        let line = fmt.raw_line(Side::Front, 10);
        assert_eq!(line[0], pattern(Side::Front, 0, 10, 0));
        assert_eq!(line[1], pattern(Side::Front, 0, 6, 1));
        assert_eq!(line[2], pattern(Side::Front, 0, 2, 2));
    }

    #[test]
    fn mirrored_feeder_lines_run_right_to_left() {
        let profile = SimProfile {
            adf_mirror: true,
            ..SimProfile::sheetfed_duplex()
        };
        let mut w = window(image_comp::GRAY, 8, 4);
        w.bitset1 = bitset1::ADF;
        let fmt = PassFormat::new(&w, &profile);
        let line = fmt.raw_line(Side::Front, 0);
        assert_eq!(line[0], pattern(Side::Front, 3, 0, 0));
        assert_eq!(line[3], pattern(Side::Front, 0, 0, 0));
    }

    #[test]
    fn twelve_bit_samples_fill_twelve_bits() {
        assert_eq!(wide_sample(0xff, true), 0x0fff);
        assert_eq!(wide_sample(0x80, false), 0x8080);
    }

    #[test]
    fn stripes_alternate_sides() {
        let front: Vec<Vec<u8>> = (0..4).map(|i| vec![b'F', i]).collect();
        let rear: Vec<Vec<u8>> = (0..4).map(|i| vec![b'R', i]).collect();
        let pass = Interlace::Stripe(2).merge(front, rear);
        let tags: Vec<u8> = pass.iter().map(|l| l[0]).collect();
        assert_eq!(tags, b"FFRRFFRR");
        assert_eq!(pass[2], vec![b'R', 0]);
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Streaming bilinear rescaler.
//
// Output line `n` samples hardware lines `floor(by)` and `floor(by) + 1`
// with `by = (hw_lines - 1) * n / lines`, weights in 1/256 steps. Columns
// work the same way. Lines arrive one at a time and only the previous one
// is kept, so an output line is emitted as soon as its lower source line
// has been pushed.

use scanwerk_core::{ColorMode, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    Bits,
    U8 { channels: usize },
    U16 { channels: usize },
}

#[derive(Debug)]
pub struct Rescaler {
    kind: SampleKind,
    hw_pixels: usize,
    hw_lines: u32,
    pixels: usize,
    lines: u32,
    out_bpl: usize,
    prev: Vec<u8>,
    pushed: u32,
    emitted: u32,
    out: Vec<u8>,
}

impl Rescaler {
    pub fn new(
        mode: ColorMode,
        hw_pixels: u32,
        hw_lines: u32,
        pixels: u32,
        lines: u32,
        out_bpl: u32,
    ) -> Self {
        let channels = mode.channels() as usize;
        let kind = match mode.depth() {
            1 => SampleKind::Bits,
            8 => SampleKind::U8 { channels },
            _ => SampleKind::U16 { channels },
        };
        Self {
            kind,
            hw_pixels: hw_pixels as usize,
            hw_lines,
            pixels: pixels as usize,
            lines,
            out_bpl: out_bpl as usize,
            prev: Vec::new(),
            pushed: 0,
            emitted: 0,
            out: vec![0u8; out_bpl as usize],
        }
    }

    /// Output lines produced so far.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }

    /// Source rows and vertical weight of output line `n`.
    fn rows(&self, n: u32) -> (u32, u32, u32) {
        let by = f64::from(self.hw_lines.saturating_sub(1)) * f64::from(n) / f64::from(self.lines);
        let sy = by.floor();
        let ydist = ((by - sy) * 256.0) as u32;
        (sy as u32, sy as u32 + 1, ydist)
    }

    fn column(&self, x: usize) -> (usize, usize, u32) {
        let bx = self.hw_pixels.saturating_sub(1) as f64 * x as f64 / self.pixels as f64;
        let sx = bx.floor();
        let xdist = ((bx - sx) * 256.0) as u32;
        let sx = sx as usize;
        (sx, (sx + 1).min(self.hw_pixels.saturating_sub(1)), xdist)
    }

    fn interpolate(&mut self, top: &[u8], bottom: &[u8], ydist: u32) {
        let wy = [256 - ydist, ydist];
        let mut out = std::mem::take(&mut self.out);
        match self.kind {
            SampleKind::Bits => {
                out.fill(0);
                let bit = |l: &[u8], p: usize| {
                    l.get(p / 8).map_or(0, |b| u32::from((b >> (7 - p % 8)) & 1))
                };
                for x in 0..self.pixels {
                    let (sx, sxx, xd) = self.column(x);
                    let wx = [256 - xd, xd];
                    let sum = bit(top, sx) * wx[0] * wy[0]
                        + bit(top, sxx) * wx[1] * wy[0]
                        + bit(bottom, sx) * wx[0] * wy[1]
                        + bit(bottom, sxx) * wx[1] * wy[1];
                    let v = sum / 257;
                    if (v >> 7) & 1 == 1 {
                        if let Some(b) = out.get_mut(x / 8) {
                            *b |= 0x80 >> (x % 8);
                        }
                    }
                }
            }
            SampleKind::U8 { channels } => {
                let s = |l: &[u8], i: usize| u32::from(l.get(i).copied().unwrap_or(0));
                for x in 0..self.pixels {
                    let (sx, sxx, xd) = self.column(x);
                    let wx = [256 - xd, xd];
                    for c in 0..channels {
                        let (a, b) = (sx * channels + c, sxx * channels + c);
                        let sum = s(top, a) * wx[0] * wy[0]
                            + s(top, b) * wx[1] * wy[0]
                            + s(bottom, a) * wx[0] * wy[1]
                            + s(bottom, b) * wx[1] * wy[1];
                        if let Some(o) = out.get_mut(x * channels + c) {
                            *o = (sum >> 16) as u8;
                        }
                    }
                }
            }
            SampleKind::U16 { channels } => {
                let s = |l: &[u8], i: usize| {
                    l.get(2 * i..2 * i + 2)
                        .map_or(0, |p| u64::from(u16::from_ne_bytes([p[0], p[1]])))
                };
                for x in 0..self.pixels {
                    let (sx, sxx, xd) = self.column(x);
                    let wx = [u64::from(256 - xd), u64::from(xd)];
                    let wy = [u64::from(wy[0]), u64::from(wy[1])];
                    for c in 0..channels {
                        let (a, b) = (sx * channels + c, sxx * channels + c);
                        let sum = s(top, a) * wx[0] * wy[0]
                            + s(top, b) * wx[1] * wy[0]
                            + s(bottom, a) * wx[0] * wy[1]
                            + s(bottom, b) * wx[1] * wy[1];
                        let at = 2 * (x * channels + c);
                        if let Some(o) = out.get_mut(at..at + 2) {
                            o.copy_from_slice(&((sum >> 16) as u16).to_ne_bytes());
                        }
                    }
                }
            }
        }
        self.out = out;
    }

    /// Feed the next hardware line, emitting every output line it completes.
    pub fn push(&mut self, line: &[u8], emit: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        let index = self.pushed;
        self.pushed += 1;
        while self.emitted < self.lines {
            let (sy, syy, ydist) = self.rows(self.emitted);
            if syy > index {
                break;
            }
            let prev = std::mem::take(&mut self.prev);
            let top = if sy < index && !prev.is_empty() {
                &prev[..]
            } else {
                line
            };
            self.interpolate(top, line, ydist);
            self.prev = prev;
            emit(&self.out)?;
            self.emitted += 1;
        }
        self.prev.clear();
        self.prev.extend_from_slice(line);
        Ok(())
    }

    /// Emit the output lines that only needed the last pushed line, such as
    /// every line of a one-line source.
    pub fn finish(&mut self, emit: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        if self.pushed == 0 {
            return Ok(());
        }
        let last = std::mem::take(&mut self.prev);
        while self.emitted < self.lines {
            let (sy, _, _) = self.rows(self.emitted);
            if sy >= self.pushed {
                break;
            }
            self.interpolate(&last, &last, 0);
            emit(&self.out)?;
            self.emitted += 1;
        }
        self.prev = last;
        Ok(())
    }

    pub fn out_bytes_per_line(&self) -> usize {
        self.out_bpl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(r: &mut Rescaler, lines: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut sink = |l: &[u8]| -> Result<()> {
            out.push(l.to_vec());
            Ok(())
        };
        for l in lines {
            r.push(l, &mut sink).unwrap();
        }
        r.finish(&mut sink).unwrap();
        out
    }

    #[test]
    fn downscale_halves_line_count() {
        let src: Vec<Vec<u8>> = (0..8).map(|_| vec![200u8; 8]).collect();
        let mut r = Rescaler::new(ColorMode::Gray, 8, 8, 4, 4, 4);
        let out = run(&mut r, &src);
        assert_eq!(out.len(), 4);
        for l in &out {
            assert!(l.iter().all(|&v| v >= 198), "{l:?}");
        }
    }

    #[test]
    fn upscale_interpolates_between_rows() {
        let src = vec![vec![0u8; 2], vec![255u8; 2]];
        let mut r = Rescaler::new(ColorMode::Gray, 2, 2, 2, 4, 2);
        let out = run(&mut r, &src);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0][0], 0);
        assert!(out[1][0] > 0 && out[1][0] < 255);
        assert!(out[2][0] >= out[1][0]);
    }

    #[test]
    fn single_line_source_fills_every_output_line() {
        let src = vec![vec![7u8, 7, 7]];
        let mut r = Rescaler::new(ColorMode::Color, 1, 1, 1, 3, 3);
        let out = run(&mut r, &src);
        assert_eq!(out, vec![vec![7u8, 7, 7]; 3]);
    }

    #[test]
    fn lineart_keeps_solid_areas() {
        let src: Vec<Vec<u8>> = (0..4).map(|_| vec![0xff, 0x00]).collect();
        let mut r = Rescaler::new(ColorMode::Lineart, 16, 4, 8, 2, 1);
        let out = run(&mut r, &src);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0][0] & 0xf0, 0xf0);
    }

    #[test]
    fn sixteen_bit_color_is_native() {
        let px: Vec<u8> = [1000u16, 2000, 3000]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let src = vec![px.clone(), px];
        let mut r = Rescaler::new(ColorMode::Color16, 1, 2, 1, 1, 6);
        let out = run(&mut r, &src);
        let v = u16::from_ne_bytes([out[0][0], out[0][1]]);
        assert!(v.abs_diff(1000) <= 1);
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Analog front-end offset search.

use std::ops::Range;

use scanwerk_core::Result;
use scanwerk_core::config::CalibrationConfig;
use scanwerk_transport::FrontendRegisters;
use tracing::{debug, warn};

/// Access to trial scans with programmable front-end registers.
pub trait TrialFrontend {
    fn set_frontend(&mut self, regs: &FrontendRegisters) -> Result<()>;

    /// Scan one line of 8-bit samples with motor and shading off.
    fn scan_line(&mut self) -> Result<Vec<u8>>;
}

/// Sample order inside a trial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLayout {
    /// `RGBRGB...`
    Interleaved,
    /// `RRR...GGG...BBB...`, as contact image sensors deliver it.
    Planar,
}

/// Shape of a trial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineShape {
    pub pixels: usize,
    pub channels: usize,
    pub layout: LineLayout,
}

impl LineShape {
    pub fn len(&self) -> usize {
        self.pixels * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(&self, pixel: usize, channel: usize) -> usize {
        match self.layout {
            LineLayout::Interleaved => pixel * self.channels + channel,
            LineLayout::Planar => channel * self.pixels + pixel,
        }
    }

    /// Mean of `channel` over `pixels`. Missing samples count as absent.
    pub fn average(&self, line: &[u8], channel: usize, pixels: Range<usize>) -> u32 {
        let (sum, n) = pixels
            .filter_map(|p| line.get(self.index(p, channel)))
            .fold((0u32, 0u32), |(s, n), &v| (s + u32::from(v), n + 1));
        if n == 0 { 0 } else { sum / n }
    }
}

/// Outcome of an offset search. Non-convergence is reported, not raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetResult {
    pub offset: [u8; 3],
    /// Dark level measured at the chosen offsets.
    pub dark_level: [u32; 3],
    pub converged: bool,
    pub iterations: u32,
}

struct Bound {
    offset: u8,
    level: u32,
}

fn measure(
    frontend: &mut dyn TrialFrontend,
    shape: &LineShape,
    offset: [u8; 3],
    margin: &Range<usize>,
) -> Result<[u32; 3]> {
    frontend.set_frontend(&FrontendRegisters {
        offset,
        gain: [0; 3],
    })?;
    let line = frontend.scan_line()?;
    let mut levels = [0u32; 3];
    for (c, level) in levels.iter_mut().enumerate().take(shape.channels.min(3)) {
        *level = shape.average(&line, c, margin.clone());
    }
    Ok(levels)
}

/// Binary-search each channel's offset register until the dark margin sits
/// at the configured target.
///
/// Both seed offsets are measured first; from then on the midpoint replaces
/// whichever bound measured on the same side of the target. That keeps the
/// search independent of whether the register raises or lowers the black
/// level, and the bounds can never cross.
pub fn search_offset(
    frontend: &mut dyn TrialFrontend,
    shape: &LineShape,
    cfg: &CalibrationConfig,
) -> Result<OffsetResult> {
    let channels = shape.channels.clamp(1, 3);
    let margin = 0..(cfg.dark_margin_pixels as usize).clamp(1, shape.pixels.max(1));
    let target = u32::from(cfg.dark_target);
    let (seed_lo, seed_hi) = if cfg.offset_low <= cfg.offset_high {
        (cfg.offset_low, cfg.offset_high)
    } else {
        (cfg.offset_high, cfg.offset_low)
    };

    let lo_levels = measure(frontend, shape, [seed_lo; 3], &margin)?;
    let hi_levels = measure(frontend, shape, [seed_hi; 3], &margin)?;
    let mut low: Vec<Bound> = (0..channels)
        .map(|c| Bound {
            offset: seed_lo,
            level: lo_levels[c],
        })
        .collect();
    let mut high: Vec<Bound> = (0..channels)
        .map(|c| Bound {
            offset: seed_hi,
            level: hi_levels[c],
        })
        .collect();

    let open = |low: &[Bound], high: &[Bound]| {
        low.iter()
            .zip(high)
            .any(|(l, h)| h.offset - l.offset > 1)
    };

    let mut iterations = 0;
    while iterations < cfg.max_offset_iterations && open(&low, &high) {
        iterations += 1;
        let mut mid = [seed_lo; 3];
        for c in 0..channels {
            mid[c] = ((u16::from(low[c].offset) + u16::from(high[c].offset)) / 2) as u8;
        }
        if channels == 1 {
            mid = [mid[0]; 3];
        }
        let levels = measure(frontend, shape, mid, &margin)?;
        for c in 0..channels {
            if high[c].offset - low[c].offset <= 1 {
                continue;
            }
            let sample_above = levels[c] > target;
            let high_above = high[c].level > target;
            if sample_above == high_above {
                high[c] = Bound {
                    offset: mid[c],
                    level: levels[c],
                };
            } else {
                low[c] = Bound {
                    offset: mid[c],
                    level: levels[c],
                };
            }
        }
        debug!(iterations, ?mid, ?levels, "offset trial");
    }

    let converged = !open(&low, &high);
    let mut result = OffsetResult {
        offset: [seed_lo; 3],
        dark_level: [0; 3],
        converged,
        iterations,
    };
    for c in 0..channels {
        let pick = if low[c].level.abs_diff(target) <= high[c].level.abs_diff(target) {
            &low[c]
        } else {
            &high[c]
        };
        result.offset[c] = pick.offset;
        result.dark_level[c] = pick.level;
    }
    if channels == 1 {
        result.offset = [result.offset[0]; 3];
        result.dark_level = [result.dark_level[0]; 3];
    }

    if !converged {
        warn!(
            iterations,
            offset = ?result.offset,
            "offset search hit its iteration cap, using best estimate"
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Front end whose black level follows the offset register linearly.
    struct FakeFrontend {
        regs: FrontendRegisters,
        bias: [i32; 3],
        inverted: bool,
        shape: LineShape,
        trials: u32,
    }

    impl FakeFrontend {
        fn new(shape: LineShape) -> Self {
            Self {
                regs: FrontendRegisters::default(),
                bias: [40, 60, 80],
                inverted: false,
                shape,
                trials: 0,
            }
        }
    }

    impl TrialFrontend for FakeFrontend {
        fn set_frontend(&mut self, regs: &FrontendRegisters) -> Result<()> {
            self.regs = *regs;
            Ok(())
        }

        fn scan_line(&mut self) -> Result<Vec<u8>> {
            self.trials += 1;
            let mut line = vec![200u8; self.shape.len()];
            for c in 0..self.shape.channels {
                let off = i32::from(self.regs.offset[c]);
                let level = if self.inverted {
                    255 - off - self.bias[c]
                } else {
                    off - self.bias[c]
                };
                for p in 0..16.min(self.shape.pixels) {
                    line[self.shape.index(p, c)] = level.clamp(0, 255) as u8;
                }
            }
            Ok(line)
        }
    }

    fn shape(layout: LineLayout) -> LineShape {
        LineShape {
            pixels: 64,
            channels: 3,
            layout,
        }
    }

    #[test]
    fn converges_per_channel_within_cap() {
        let cfg = CalibrationConfig::default();
        let s = shape(LineLayout::Interleaved);
        let mut fe = FakeFrontend::new(s);
        let r = search_offset(&mut fe, &s, &cfg).unwrap();
        assert!(r.converged);
        assert!(r.iterations <= 32);
        for c in 0..3 {
            assert!(r.dark_level[c].abs_diff(4) <= 1, "channel {c}: {r:?}");
        }
        assert_eq!(r.offset[0], 44);
    }

    #[test]
    fn polarity_does_not_matter() {
        let cfg = CalibrationConfig::default();
        let s = shape(LineLayout::Planar);
        let mut fe = FakeFrontend::new(s);
        fe.inverted = true;
        let r = search_offset(&mut fe, &s, &cfg).unwrap();
        assert!(r.converged);
        for c in 0..3 {
            assert!(r.dark_level[c].abs_diff(4) <= 1, "channel {c}: {r:?}");
        }
    }

    #[test]
    fn iteration_cap_is_best_effort() {
        let cfg = CalibrationConfig {
            max_offset_iterations: 2,
            ..CalibrationConfig::default()
        };
        let s = shape(LineLayout::Interleaved);
        let mut fe = FakeFrontend::new(s);
        let r = search_offset(&mut fe, &s, &cfg).unwrap();
        assert!(!r.converged);
        assert_eq!(r.iterations, 2);
        // Two seed trials plus two iterations.
        assert_eq!(fe.trials, 4);
    }

    #[test]
    fn gray_sets_all_registers_alike() {
        let cfg = CalibrationConfig::default();
        let gray = LineShape {
            pixels: 32,
            channels: 1,
            layout: LineLayout::Interleaved,
        };
        let mut fe = FakeFrontend::new(gray);
        let r = search_offset(&mut fe, &gray, &cfg).unwrap();
        assert_eq!(r.offset[0], r.offset[1]);
        assert_eq!(r.offset[1], r.offset[2]);
    }

    #[test]
    fn planar_and_interleaved_index_differently() {
        let planar = shape(LineLayout::Planar);
        let inter = shape(LineLayout::Interleaved);
        assert_eq!(planar.index(1, 2), 129);
        assert_eq!(inter.index(1, 2), 5);
        let line: Vec<u8> = (0..192).map(|i| (i % 3) as u8).collect();
        assert_eq!(inter.average(&line, 2, 0..64), 2);
    }
}

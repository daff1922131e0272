// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Analog front-end gain estimate: one trial line, one linear correction.

use scanwerk_core::Result;
use scanwerk_core::config::CalibrationConfig;
use scanwerk_transport::FrontendRegisters;
use tracing::debug;

use super::offset::{TrialFrontend, LineShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GainResult {
    pub gain: [u8; 3],
    /// White level measured at gain code 0.
    pub white_level: [u32; 3],
}

/// Discrete gain code for a channel whose white level measured `level`.
pub fn gain_code(level: u32, cfg: &CalibrationConfig) -> u8 {
    if level == 0 {
        return u8::MAX;
    }
    let gain = cfg.white_reference / f64::from(level);
    let code = cfg.gain_code_base - cfg.gain_code_scale / gain;
    code.clamp(0.0, 255.0) as u8
}

/// Estimate per-channel gain from one line at gain 0 with the given offsets.
/// Contact image sensors share one gain, the lowest of the three.
pub fn search_gain(
    frontend: &mut dyn TrialFrontend,
    shape: &LineShape,
    offset: [u8; 3],
    cis: bool,
    cfg: &CalibrationConfig,
) -> Result<GainResult> {
    frontend.set_frontend(&FrontendRegisters {
        offset,
        gain: [0; 3],
    })?;
    let line = frontend.scan_line()?;

    let channels = shape.channels.clamp(1, 3);
    let centre = shape.pixels / 4..shape.pixels * 3 / 4;
    let mut white_level = [0u32; 3];
    let mut gain = [0u8; 3];
    for c in 0..channels {
        white_level[c] = shape.average(&line, c, centre.clone());
        gain[c] = gain_code(white_level[c], cfg);
    }
    if channels == 1 {
        white_level = [white_level[0]; 3];
        gain = [gain[0]; 3];
    }
    if cis {
        let shared = gain.iter().copied().min().unwrap_or(0);
        gain = [shared; 3];
    }
    debug!(?white_level, ?gain, "gain estimate");
    Ok(GainResult { gain, white_level })
}

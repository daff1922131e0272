// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Colour packing.
//
// Sensors with a colour line difference deliver each channel `ld` lines
// apart: the red sample of image line `n` sits in raw line `n`, green in
// `n + ld`, blue in `n + 2 * ld`. Line-packing sensors deliver one line as
// three planes. Both are turned into interleaved RGB here.

use scanwerk_core::{Result, ScanError};

/// Pack line `line` of `stripe` (contiguous raw lines of `bpl` bytes) into `out`.
///
/// `stripe` must hold at least `line + 2 * ld + 1` lines.
pub fn color_pack(
    stripe: &[u8],
    line: usize,
    bpl: usize,
    ld: usize,
    sample_bytes: usize,
    out: &mut [u8],
) -> Result<()> {
    let sample_bytes = sample_bytes.max(1);
    let base = line * bpl;
    let needed = base + 2 * ld * bpl + bpl;
    if stripe.len() < needed || out.len() < bpl {
        return Err(ScanError::Io(format!(
            "colour pack of line {line} needs {needed} stripe bytes, have {}",
            stripe.len()
        )));
    }
    for (i, o) in out[..bpl].iter_mut().enumerate() {
        let c = (i / sample_bytes) % 3;
        *o = stripe[base + i + c * ld * bpl];
    }
    Ok(())
}

/// Interleave a planar `R..R G..G B..B` line of `pixels` pixels.
pub fn line_pack(planar: &[u8], pixels: usize, sample_bytes: usize, out: &mut [u8]) -> Result<()> {
    let plane = pixels * sample_bytes;
    if planar.len() < 3 * plane || out.len() < 3 * plane {
        return Err(ScanError::Io(format!(
            "line pack of {pixels} pixels needs {} bytes",
            3 * plane
        )));
    }
    for p in 0..pixels {
        for c in 0..3 {
            let src = c * plane + p * sample_bytes;
            let dst = (p * 3 + c) * sample_bytes;
            out[dst..dst + sample_bytes].copy_from_slice(&planar[src..src + sample_bytes]);
        }
    }
    Ok(())
}

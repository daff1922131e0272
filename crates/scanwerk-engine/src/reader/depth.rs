// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// 16-bit sample handling: byte order, 12-bit widening and software shading.

use crate::calibration::shading::WHITE_MAP_RANGE;

/// Per-element shading applied on the host, for devices that cannot take an
/// uploaded table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShadingTables {
    pub dark: Vec<u16>,
    /// White multipliers, [`WHITE_MAP_RANGE`] meaning unity.
    pub white: Vec<u16>,
}

impl ShadingTables {
    fn correct(&self, element: usize, v: u32) -> u32 {
        let dark = self.dark.get(element).copied().unwrap_or(0);
        let white = self.white.get(element).copied().unwrap_or(WHITE_MAP_RANGE);
        v.saturating_sub(u32::from(dark)) * u32::from(white) / u32::from(WHITE_MAP_RANGE)
    }
}

/// Convert a line of little-endian device samples to native byte order,
/// widening 12-bit samples and applying `shading` when given.
pub fn widen_line(line: &mut [u8], twelve_bit: bool, shading: Option<&ShadingTables>) {
    for (element, pair) in line.chunks_exact_mut(2).enumerate() {
        let mut v = u32::from(u16::from_le_bytes([pair[0], pair[1]]));
        if twelve_bit {
            v <<= 4;
        }
        if let Some(tables) = shading {
            v = tables.correct(element, v);
        }
        let out = v.min(u32::from(u16::MAX)) as u16;
        pair.copy_from_slice(&out.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(line: &[u8]) -> Vec<u16> {
        line.chunks_exact(2)
            .map(|p| u16::from_ne_bytes([p[0], p[1]]))
            .collect()
    }

    #[test]
    fn little_endian_becomes_native() {
        let mut line = [0x34, 0x12, 0xff, 0x00];
        widen_line(&mut line, false, None);
        assert_eq!(samples(&line), vec![0x1234, 0x00ff]);
    }

    #[test]
    fn twelve_bit_shifts_and_saturates() {
        let mut line = [0xff, 0x0f, 0x00, 0x10];
        widen_line(&mut line, true, None);
        assert_eq!(samples(&line), vec![0xfff0, 0xffff]);
    }

    #[test]
    fn shading_subtracts_dark_and_scales_white() {
        let tables = ShadingTables {
            dark: vec![100, 0],
            white: vec![WHITE_MAP_RANGE, WHITE_MAP_RANGE * 2],
        };
        let mut line = Vec::new();
        line.extend_from_slice(&1100u16.to_le_bytes());
        line.extend_from_slice(&1000u16.to_le_bytes());
        line.extend_from_slice(&500u16.to_le_bytes());
        widen_line(&mut line, false, Some(&tables));
        // Elements beyond the table use unity.
        assert_eq!(samples(&line), vec![1000, 2000, 500]);
    }

    #[test]
    fn dark_above_sample_floors_at_zero() {
        let tables = ShadingTables {
            dark: vec![5000],
            white: vec![],
        };
        let mut line = 100u16.to_le_bytes();
        widen_line(&mut line, false, Some(&tables));
        assert_eq!(samples(&line), vec![0]);
    }
}

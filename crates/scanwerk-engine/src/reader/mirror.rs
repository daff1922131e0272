// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Horizontal mirroring for feeders that deliver lines right to left.

/// Mirror one line in place.
///
/// `pixel_bytes` is the size of the unit that keeps its internal order:
/// a whole pixel for RGB, a sample for gray or BGR-ordered colour (which is
/// turned into RGB by reversing everything). Zero means a 1-bit line, whose
/// bytes and bits are both reversed.
pub fn mirror_line(line: &mut [u8], pixel_bytes: usize) {
    match pixel_bytes {
        0 => {
            line.reverse();
            for b in line.iter_mut() {
                *b = b.reverse_bits();
            }
        }
        1 => line.reverse(),
        n => {
            let units = line.len() / n;
            for i in 0..units / 2 {
                let j = units - 1 - i;
                let (head, tail) = line.split_at_mut(j * n);
                head[i * n..(i + 1) * n].swap_with_slice(&mut tail[..n]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_reverses_samples() {
        let mut l = [1, 2, 3, 4];
        mirror_line(&mut l, 1);
        assert_eq!(l, [4, 3, 2, 1]);
    }

    #[test]
    fn rgb_keeps_channel_order() {
        let mut l = [1, 2, 3, 4, 5, 6, 7, 8, 9];
        mirror_line(&mut l, 3);
        assert_eq!(l, [7, 8, 9, 4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn bgr_reversal_yields_rgb() {
        // Device BGR, right to left: pixel 1 then pixel 0.
        let mut l = [30, 20, 10, 3, 2, 1];
        mirror_line(&mut l, 1);
        assert_eq!(l, [1, 2, 3, 10, 20, 30]);
    }

    #[test]
    fn sixteen_bit_gray_keeps_byte_pairs() {
        let mut l = [1, 2, 3, 4, 5, 6];
        mirror_line(&mut l, 2);
        assert_eq!(l, [5, 6, 3, 4, 1, 2]);
    }

    #[test]
    fn lineart_reverses_bits() {
        let mut l = [0b1000_0000, 0b0000_0011];
        mirror_line(&mut l, 0);
        assert_eq!(l, [0b1100_0000, 0b0000_0001]);
    }

    #[test]
    fn mirroring_twice_is_identity() {
        let orig: Vec<u8> = (0..60).collect();
        for unit in [0, 1, 2, 3, 6] {
            let mut l = orig.clone();
            mirror_line(&mut l, unit);
            mirror_line(&mut l, unit);
            assert_eq!(l, orig, "unit {unit}");
        }
    }
}

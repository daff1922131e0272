// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Duplex deinterlacing: which raw lines of an interlaced pass belong to the
// rear page.

use serde::{Deserialize, Serialize};

/// How front and rear lines share one device pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Deinterlace {
    /// Single-sided pass.
    #[default]
    None,
    /// Alternating runs of `lines_per_stripe` front and rear lines.
    Stripe { lines_per_stripe: u32 },
    /// All front lines first, then all rear lines.
    Half { total_lines: u32 },
    /// Even lines front, odd lines rear.
    Line,
}

impl Deinterlace {
    pub fn is_interlaced(self) -> bool {
        self != Self::None
    }

    /// Whether raw line `absline` of the pass belongs to the rear page.
    pub fn is_rear_line(self, absline: u64) -> bool {
        match self {
            Self::None => false,
            Self::Stripe { lines_per_stripe } => {
                let lps = u64::from(lines_per_stripe.max(1));
                absline % (2 * lps) >= lps
            }
            Self::Half { total_lines } => absline >= u64::from(total_lines) / 2,
            Self::Line => absline % 2 == 1,
        }
    }
}

/// Merge a front and rear page into one pass the way `scheme` interlaces it.
/// Used by the benchmarks and tests.
pub fn interleave(scheme: Deinterlace, front: &[Vec<u8>], rear: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let total = front.len() + rear.len();
    let (mut f, mut r) = (front.iter(), rear.iter());
    (0..total as u64)
        .filter_map(|abs| {
            if scheme.is_rear_line(abs) {
                r.next().or_else(|| f.next())
            } else {
                f.next().or_else(|| r.next())
            }
            .cloned()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(tag: u8, n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![tag, i as u8]).collect()
    }

    fn split(scheme: Deinterlace, pass: &[Vec<u8>]) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
        let mut front = Vec::new();
        let mut rear = Vec::new();
        for (abs, line) in pass.iter().enumerate() {
            if scheme.is_rear_line(abs as u64) {
                rear.push(line.clone());
            } else {
                front.push(line.clone());
            }
        }
        (front, rear)
    }

    #[test]
    fn stripe_scheme_alternates_runs() {
        let s = Deinterlace::Stripe {
            lines_per_stripe: 4,
        };
        let rear: Vec<bool> = (0..16).map(|l| s.is_rear_line(l)).collect();
        assert_eq!(&rear[..8], &[false, false, false, false, true, true, true, true]);
        assert_eq!(&rear[8..12], &[false; 4]);
    }

    #[test]
    fn half_scheme_splits_at_midpoint() {
        let s = Deinterlace::Half { total_lines: 10 };
        assert!(!s.is_rear_line(4));
        assert!(s.is_rear_line(5));
        assert!(s.is_rear_line(9));
    }

    #[test]
    fn line_scheme_uses_parity() {
        assert!(!Deinterlace::Line.is_rear_line(0));
        assert!(Deinterlace::Line.is_rear_line(1));
        assert!(!Deinterlace::None.is_rear_line(1));
    }

    #[test]
    fn split_recovers_both_pages() {
        let front = page(b'F', 12);
        let rear = page(b'R', 12);
        for scheme in [
            Deinterlace::Stripe {
                lines_per_stripe: 4,
            },
            Deinterlace::Half { total_lines: 24 },
            Deinterlace::Line,
        ] {
            let pass = interleave(scheme, &front, &rear);
            assert_eq!(pass.len(), 24);
            let (f, r) = split(scheme, &pass);
            assert_eq!(f, front, "{scheme:?}");
            assert_eq!(r, rear, "{scheme:?}");
        }
    }
}

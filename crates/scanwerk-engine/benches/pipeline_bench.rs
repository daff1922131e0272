// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the per-line work of the stripe reader and the
// shading reduction run during calibration.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use scanwerk_core::ColorMode;
use scanwerk_engine::calibration::shading::{ShadingLayout, sort_and_average};
use scanwerk_engine::reader::interlace::interleave;
use scanwerk_engine::reader::pack::{color_pack, line_pack};
use scanwerk_engine::reader::scale::Rescaler;
use scanwerk_engine::reader::Deinterlace;

/// Letter width at 300 dpi.
const PIXELS: usize = 2544;

fn ramp(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

// ---------------------------------------------------------------------------
// Colour packing
// ---------------------------------------------------------------------------

/// One 300 dpi RGB line packed from a stripe with an eight-line skew.
fn bench_color_pack(c: &mut Criterion) {
    let bpl = PIXELS * 3;
    let ld = 8;
    let stripe = ramp(bpl * (2 * ld + 1));
    let mut out = vec![0u8; bpl];

    c.bench_function("color_pack (8-bit, ld 8)", |b| {
        b.iter(|| {
            color_pack(black_box(&stripe), 0, bpl, ld, 1, &mut out).unwrap();
        });
    });
}

fn bench_line_pack(c: &mut Criterion) {
    let planar = ramp(PIXELS * 3 * 2);
    let mut out = vec![0u8; planar.len()];

    c.bench_function("line_pack (16-bit)", |b| {
        b.iter(|| {
            line_pack(black_box(&planar), PIXELS, 2, &mut out).unwrap();
        });
    });
}

// ---------------------------------------------------------------------------
// Duplex interlacing
// ---------------------------------------------------------------------------

/// Split a 64-line stripe-interlaced gray pass back into its two sides.
fn bench_deinterlace(c: &mut Criterion) {
    let scheme = Deinterlace::Stripe { lines_per_stripe: 32 };
    let front: Vec<Vec<u8>> = (0..64).map(|_| ramp(PIXELS)).collect();
    let rear = front.clone();
    let pass = interleave(scheme, &front, &rear);

    c.bench_function("deinterlace (stripe 32, 128 lines)", |b| {
        b.iter(|| {
            let (mut f, mut r) = (0usize, 0usize);
            for (abs, line) in pass.iter().enumerate() {
                if scheme.is_rear_line(abs as u64) {
                    r += line.len();
                } else {
                    f += line.len();
                }
            }
            black_box((f, r))
        });
    });
}

// ---------------------------------------------------------------------------
// Rescaling
// ---------------------------------------------------------------------------

/// 300 dpi colour rows rescaled to 250 dpi, 32 lines at a time.
fn bench_rescale(c: &mut Criterion) {
    let hw_pixels = PIXELS as u32;
    let pixels = hw_pixels * 250 / 300;
    let line = ramp(PIXELS * 3);

    c.bench_function("rescale (colour 300 -> 250 dpi, 32 lines)", |b| {
        b.iter(|| {
            let mut scaler = Rescaler::new(
                ColorMode::Color,
                hw_pixels,
                32,
                pixels,
                32 * 250 / 300,
                pixels * 3,
            );
            let mut rows = 0u32;
            let mut emit = |_: &[u8]| -> scanwerk_core::Result<()> {
                rows += 1;
                Ok(())
            };
            for _ in 0..32 {
                scaler.push(black_box(&line), &mut emit).unwrap();
            }
            scaler.finish(&mut emit).unwrap();
            black_box(rows)
        });
    });
}

// ---------------------------------------------------------------------------
// Shading
// ---------------------------------------------------------------------------

/// Average twelve colour reference lines of 16-bit samples per element.
fn bench_sort_and_average(c: &mut Criterion) {
    let layout = ShadingLayout {
        pixels: 5100,
        channels: 3,
        lines: 4,
        bytes_per_channel: 2,
    };
    let data = ramp(layout.data_len());

    c.bench_function("sort_and_average (5100 px colour)", |b| {
        b.iter(|| {
            let avg = sort_and_average(&layout, black_box(&data)).unwrap();
            assert_eq!(avg.len(), layout.elements());
        });
    });
}

criterion_group!(
    benches,
    bench_color_pack,
    bench_line_pack,
    bench_deinterlace,
    bench_rescale,
    bench_sort_and_average,
);
criterion_main!(benches);

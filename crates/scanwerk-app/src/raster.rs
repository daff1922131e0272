// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Turn a scanned page into an image file.

use std::path::Path;

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use scanwerk_core::{FrameFormat, Result, ScanError, ScanParameters};

fn shape_error(params: &ScanParameters, len: usize) -> ScanError {
    ScanError::Io(format!(
        "{len} bytes do not form {}x{} pixel rows of depth {}",
        params.pixels_per_line, params.bytes_per_line, params.depth
    ))
}

/// Wrap `data` in an image buffer. The line count comes from the data, so
/// feeder pages of unknown length work too.
pub fn to_image(params: &ScanParameters, data: &[u8]) -> Result<DynamicImage> {
    let bpl = params.bytes_per_line as usize;
    if bpl == 0 || data.len() % bpl != 0 {
        return Err(shape_error(params, data.len()));
    }
    let width = params.pixels_per_line;
    let height = (data.len() / bpl) as u32;

    let image = match (params.depth, params.format) {
        // One bit per pixel, set bits are black.
        (1, _) => {
            let mut pixels = Vec::with_capacity((width * height) as usize);
            for row in data.chunks_exact(bpl) {
                for x in 0..width as usize {
                    let bit = row[x / 8] & (0x80 >> (x % 8));
                    pixels.push(if bit != 0 { 0 } else { 255 });
                }
            }
            GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
        }
        (8, FrameFormat::Gray) => {
            GrayImage::from_raw(width, height, data.to_vec()).map(DynamicImage::ImageLuma8)
        }
        (8, FrameFormat::Rgb) => {
            RgbImage::from_raw(width, height, data.to_vec()).map(DynamicImage::ImageRgb8)
        }
        (16, format) => {
            let samples: Vec<u16> = data
                .chunks_exact(2)
                .map(|p| u16::from_ne_bytes([p[0], p[1]]))
                .collect();
            match format {
                FrameFormat::Gray => ImageBuffer::<Luma<u16>, _>::from_raw(width, height, samples)
                    .map(DynamicImage::ImageLuma16),
                FrameFormat::Rgb => ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, samples)
                    .map(DynamicImage::ImageRgb16),
            }
        }
        _ => None,
    };
    image.ok_or_else(|| shape_error(params, data.len()))
}

/// Write `data` as a PNG at `path`.
pub fn write_png(params: &ScanParameters, data: &[u8], path: &Path) -> Result<()> {
    let image = to_image(params, data)?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| ScanError::Io(format!("cannot write {}: {e}", path.display())))
}

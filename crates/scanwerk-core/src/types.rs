// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk acquisition engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Millimetres per inch, used for every physical-to-pixel conversion.
pub const MM_PER_INCH: f64 = 25.4;

/// Unique identifier for a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Colour/bit-depth combination of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorMode {
    /// 1 bit per pixel, hardware threshold.
    Lineart,
    /// 1 bit per pixel, hardware halftone.
    Dithered,
    Gray,
    /// 12-bit gray, delivered widened to 16 bits.
    Gray12,
    Gray16,
    Color,
    /// 12-bit colour, delivered widened to 16 bits per channel.
    Color12,
    Color16,
}

impl ColorMode {
    pub const ALL: [ColorMode; 8] = [
        Self::Lineart,
        Self::Dithered,
        Self::Gray,
        Self::Gray12,
        Self::Gray16,
        Self::Color,
        Self::Color12,
        Self::Color16,
    ];

    pub fn is_color(self) -> bool {
        matches!(self, Self::Color | Self::Color12 | Self::Color16)
    }

    pub fn is_gray(self) -> bool {
        matches!(self, Self::Gray | Self::Gray12 | Self::Gray16)
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Self::Lineart | Self::Dithered)
    }

    /// Modes whose device samples carry only 12 significant bits.
    pub fn is_twelve_bit(self) -> bool {
        matches!(self, Self::Gray12 | Self::Color12)
    }

    /// Bits per output sample.
    pub fn depth(self) -> u8 {
        match self {
            Self::Lineart | Self::Dithered => 1,
            Self::Gray | Self::Color => 8,
            Self::Gray12 | Self::Gray16 | Self::Color12 | Self::Color16 => 16,
        }
    }

    pub fn channels(self) -> u32 {
        if self.is_color() { 3 } else { 1 }
    }

    /// Bytes per sample for byte-aligned modes, zero for 1-bit modes.
    pub fn bytes_per_sample(self) -> usize {
        match self.depth() {
            16 => 2,
            8 => 1,
            _ => 0,
        }
    }

    /// Bytes needed to carry `pixels` pixels of one line.
    pub fn bytes_per_line(self, pixels: u32) -> u32 {
        match self.depth() {
            1 => pixels.div_ceil(8),
            8 => pixels * self.channels(),
            _ => pixels * self.channels() * 2,
        }
    }

    pub fn frame_format(self) -> FrameFormat {
        if self.is_color() {
            FrameFormat::Rgb
        } else {
            FrameFormat::Gray
        }
    }

    /// Human-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Lineart => "Lineart",
            Self::Dithered => "Dithered",
            Self::Gray => "Gray",
            Self::Gray12 => "12bit Gray",
            Self::Gray16 => "16bit Gray",
            Self::Color => "Color",
            Self::Color12 => "12bit Color",
            Self::Color16 => "16bit Color",
        }
    }
}

/// Where the document is scanned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceMode {
    Flatbed,
    /// Film / transparency adapter.
    Transparency,
    /// Feeder, front side.
    Adf,
    /// Feeder, rear side only.
    AdfRear,
    /// Feeder, both sides as consecutive logical pages.
    AdfDuplex,
}

/// Physical scan area class, which selects the scan range of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceDim {
    Flatbed,
    Transparency,
    Adf,
}

impl SourceMode {
    pub fn is_adf(self) -> bool {
        matches!(self, Self::Adf | Self::AdfRear | Self::AdfDuplex)
    }

    pub fn dim(self) -> SourceDim {
        match self {
            Self::Flatbed => SourceDim::Flatbed,
            Self::Transparency => SourceDim::Transparency,
            Self::Adf | Self::AdfRear | Self::AdfDuplex => SourceDim::Adf,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Flatbed => "Flatbed",
            Self::Transparency => "Transparency",
            Self::Adf => "ADF Front",
            Self::AdfRear => "ADF Back",
            Self::AdfDuplex => "ADF Duplex",
        }
    }
}

/// Scan rectangle in millimetres relative to the top-left of the scan range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanArea {
    pub tl_x: f64,
    pub tl_y: f64,
    pub br_x: f64,
    pub br_y: f64,
}

impl ScanArea {
    pub fn new(tl_x: f64, tl_y: f64, br_x: f64, br_y: f64) -> Self {
        Self {
            tl_x,
            tl_y,
            br_x,
            br_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.br_x - self.tl_x
    }

    pub fn height(&self) -> f64 {
        self.br_y - self.tl_y
    }
}

impl Default for ScanArea {
    fn default() -> Self {
        // A4 portrait.
        Self::new(0.0, 0.0, 210.0, 297.0)
    }
}

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanRequest {
    /// Requested resolution in dpi, applied to both axes.
    pub resolution: u32,
    pub area: ScanArea,
    pub mode: ColorMode,
    pub source: SourceMode,
    pub preview: bool,
    /// Scan the rear side on a second, flipped pass (feeders that turn the sheet).
    pub adf_flip: bool,
    /// Extra millimetres scanned before the page on tune-scan-length feeders.
    pub overscan_top: f64,
    /// Extra millimetres scanned after the page on tune-scan-length feeders.
    pub overscan_bottom: f64,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            resolution: 300,
            area: ScanArea::default(),
            mode: ColorMode::Color,
            source: SourceMode::Flatbed,
            preview: false,
            adf_flip: false,
            overscan_top: 0.0,
            overscan_bottom: 0.0,
        }
    }
}

/// Layout of one output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    Gray,
    Rgb,
}

/// Geometry a caller needs to interpret the pixel stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParameters {
    pub format: FrameFormat,
    pub last_frame: bool,
    pub pixels_per_line: u32,
    /// Number of lines, or -1 when the length is only known at end of data.
    pub lines: i32,
    pub bytes_per_line: u32,
    pub depth: u8,
}

/// Lifecycle states of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Configuring,
    Calibrating,
    WindowSet,
    Scanning,
    Draining,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    /// States in which no reader task is running.
    pub fn is_quiescent(self) -> bool {
        !matches!(self, Self::Scanning | Self::Draining)
    }
}

/// How `read` behaves when no data is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IoMode {
    #[default]
    Blocking,
    NonBlocking,
}

/// Result of one consumer read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// This many bytes were copied into the caller's buffer.
    Data(usize),
    /// Non-blocking mode and nothing is buffered yet.
    WouldBlock,
    /// The current page is complete.
    Eof,
}

/// Error classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Link hiccup or busy device; retry after a short back-off.
    Transient,
    /// Physical media state the user has to resolve.
    UserAction,
    /// Retrying cannot help.
    Permanent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_line_by_mode() {
        assert_eq!(ColorMode::Lineart.bytes_per_line(2544), 318);
        assert_eq!(ColorMode::Gray.bytes_per_line(100), 100);
        assert_eq!(ColorMode::Gray16.bytes_per_line(100), 200);
        assert_eq!(ColorMode::Color.bytes_per_line(100), 300);
        assert_eq!(ColorMode::Color12.bytes_per_line(100), 600);
    }

    #[test]
    fn twelve_bit_modes_deliver_sixteen() {
        assert_eq!(ColorMode::Gray12.depth(), 16);
        assert_eq!(ColorMode::Color12.depth(), 16);
        assert!(ColorMode::Color12.is_twelve_bit());
    }

    #[test]
    fn adf_sources_share_one_dim() {
        assert_eq!(SourceMode::AdfDuplex.dim(), SourceDim::Adf);
        assert!(SourceMode::AdfRear.is_adf());
        assert!(!SourceMode::Transparency.is_adf());
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: ScanRequest = serde_json::from_str(r#"{"resolution": 150}"#).unwrap();
        assert_eq!(req.resolution, 150);
        assert_eq!(req.mode, ColorMode::Color);
        assert_eq!(req.area, ScanArea::default());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}

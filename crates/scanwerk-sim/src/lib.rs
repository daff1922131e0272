// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk sim: a virtual scanner that speaks both transports.
//
// The firmware answers inquiry, window, calibration and image commands for a
// configurable device profile and produces a known test pattern, distorted the
// way real sensors distort it. Engine tests and the demo binary drive it in
// place of hardware.

mod firmware;
pub mod image;
pub mod link;
pub mod profile;
pub mod scanner;

pub use image::{Side, lineart_byte, pattern, wide_sample};
pub use link::{SimScsiBus, SimUsbPipe};
pub use profile::SimProfile;
pub use scanner::VirtualScanner;

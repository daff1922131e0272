// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk engine: capability probing, calibration, window setup, the
// stripe reader and the session state machine behind the consumer API.
// Everything here talks to a device through `scanwerk-transport`.

pub mod calibration;
pub mod capabilities;
pub mod commands;
pub mod handle;
pub mod pipe;
pub mod reader;
pub mod registry;
pub mod session;
pub mod spool;
pub mod task;
pub mod window;

pub use calibration::{CalibrationData, CalibrationEngine};
pub use capabilities::{DeviceCapabilities, DeviceQuirks};
pub use handle::{ScanOption, ScannerHandle};
pub use pipe::byte_pipe;
pub use registry::DeviceRegistry;
pub use session::ScanSession;
pub use task::ReaderTask;
pub use window::ScanGeometry;

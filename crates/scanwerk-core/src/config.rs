// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.
//
// Loaded from JSON; every field has a default so partial files are accepted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings that apply to every attached device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Never run calibration.
    pub disable_calibration: bool,
    /// Calibrate even when the device reports it is not needed.
    pub force_calibration: bool,
    /// Clamp every scan range to A4.
    pub force_a4: bool,
    /// Widen every scan range to A3.
    pub force_a3: bool,
    /// Number of stripes the output pipe buffers before the reader blocks.
    pub pipe_capacity: usize,
    /// How long `cancel` waits for the reader task to acknowledge.
    pub cancel_ack_timeout_ms: u64,
    /// Directory for rear-page spool files; the system temp dir when unset.
    pub spool_dir: Option<PathBuf>,
    pub transport: TransportConfig,
    pub calibration: CalibrationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            disable_calibration: false,
            force_calibration: false,
            force_a4: false,
            force_a3: false,
            pipe_capacity: 4,
            cancel_ack_timeout_ms: 5_000,
            spool_dir: None,
            transport: TransportConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn cancel_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_ack_timeout_ms)
    }
}

/// Command transport tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Attempts per command before a transient failure surfaces.
    pub max_attempts: u32,
    /// Streaming transports zero-pad shorter command blocks to this size.
    pub min_frame: usize,
    /// Largest single data transfer in bytes.
    pub max_transfer: usize,
    pub standard_timeout_ms: u64,
    pub status_timeout_ms: u64,
    pub inquiry_timeout_ms: u64,
    pub readiness_timeout_ms: u64,
    /// Back-off after a busy status before the next attempt.
    pub busy_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            min_frame: 10,
            max_transfer: 256 * 1024,
            standard_timeout_ms: 30_000,
            status_timeout_ms: 10_000,
            inquiry_timeout_ms: 1_000,
            readiness_timeout_ms: 15_000,
            busy_delay_ms: 100,
        }
    }
}

impl TransportConfig {
    pub fn standard_timeout(&self) -> Duration {
        Duration::from_millis(self.standard_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn inquiry_timeout(&self) -> Duration {
        Duration::from_millis(self.inquiry_timeout_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn busy_delay(&self) -> Duration {
        Duration::from_millis(self.busy_delay_ms)
    }
}

/// Analog front-end calibration tuning.
///
/// The offset seeds and gain-code constants are device-family defaults, not
/// protocol requirements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Lower offset register value of the first trial scan.
    pub offset_low: u8,
    /// Upper offset register value of the second trial scan.
    pub offset_high: u8,
    /// Iteration cap of the offset binary search.
    pub max_offset_iterations: u32,
    /// Leading sensor pixels that are masked from light.
    pub dark_margin_pixels: u32,
    /// Average the dark margin should settle on.
    pub dark_target: u8,
    /// Peak value the gain estimate aims for.
    pub white_reference: f64,
    /// Gain code = `gain_code_base - gain_code_scale / gain`.
    pub gain_code_base: f64,
    pub gain_code_scale: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            offset_low: 10,
            offset_high: 255,
            max_offset_iterations: 32,
            dark_margin_pixels: 16,
            dark_target: 4,
            white_reference: 210.0,
            gain_code_base: 283.0,
            gain_code_scale: 208.0,
        }
    }
}

/// Per-model overrides from the device list. Anything set here wins over the
/// bits the device reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceQuirks {
    /// Never calibrate.
    pub no_calibration: bool,
    /// Upload all shading channels in one command.
    pub one_calib_cmd: bool,
    /// Upload shading one channel per command.
    pub multi_calib_cmd: bool,
    /// Gray shading is taken from the blue channel.
    pub gray_calib_blue: bool,
    pub film_scanner: bool,
    /// Use film ranges when the device reports none.
    pub force_film: bool,
    /// Use A3 ranges when the device reports none.
    pub force_a3: bool,
    pub no_background: bool,
    /// Half-split duplex at or below 300 dpi.
    pub non_interlaced_duplex_300: bool,
    /// Every second line belongs to the rear page.
    pub second_line_interlaced: bool,
    pub keeps_window: Option<bool>,
    /// Shading survives between feeder sheets, so later pages skip
    /// calibration. The inquiry has no bit for this.
    pub keeps_calibration: bool,
    pub adf_bgr_order_invert: bool,
    pub twelve_bit_mode: bool,
    /// Offer gray modes even when the device claims it has none.
    pub gray_modes: bool,
    pub no_rear: bool,
    /// Hardware steps through a fixed resolution ladder; rescale in software.
    pub soft_scale: bool,
    /// Rear page trails the front by half an inch.
    pub rear_offset: bool,
    /// The device starts on SET WINDOW; SCAN must not be sent.
    pub no_start_scan: bool,
    /// Status arrives on the interrupt endpoint.
    pub int_status: bool,
    pub no_tune_scan_length: bool,
    /// The feeder turns the sheet for a second pass instead of interlacing.
    pub adf_flipping_duplex: bool,
    pub no_button: bool,
    /// Analog front end needs offset and gain calibration.
    pub analog_frontend: bool,
    /// Contact image sensor: one gain for all channels, planar trial lines.
    pub cis_sensor: bool,
    /// Apply shading to 16-bit data in software.
    pub software_shading: bool,
}

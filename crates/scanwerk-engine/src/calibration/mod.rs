// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Calibration engine.
//
// Three composable steps run as short trial scans: front-end offset search,
// front-end gain estimate and the shading table. Each step failing at the
// transport level fails calibration; numeric non-convergence only warns.

pub mod gain;
pub mod offset;
pub mod shading;

use scanwerk_core::config::CalibrationConfig;
use scanwerk_core::{ColorMode, Result, ScanError, SourceDim};
use scanwerk_transport::command::data_type;
use scanwerk_transport::wire::CALIB_FORMAT_LEN;
use scanwerk_transport::{CalibrationFormat, FrontendRegisters, Transport};
use tracing::{debug, info, instrument};

use crate::capabilities::DeviceCapabilities;
use crate::commands::{self, scan_flags};
use offset::{TrialFrontend, LineLayout, LineShape};
use shading::ShadingLayout;

/// Sensor configuration a calibration result is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalibrationKey {
    pub color: bool,
    pub source: SourceDim,
}

impl CalibrationKey {
    pub fn new(mode: ColorMode, source: SourceDim) -> Self {
        Self {
            color: mode.is_color(),
            source,
        }
    }
}

/// Result of one calibration run, owned by the session.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationData {
    pub key: CalibrationKey,
    pub frontend: Option<FrontendRegisters>,
    pub offset_converged: bool,
    pub layout: Option<ShadingLayout>,
    /// Averaged dark reference, one value per element.
    pub dark_avg: Vec<u16>,
    /// Averaged white reference with the dark level removed.
    pub white_avg: Vec<u16>,
    /// Dark offsets as derived from `dark_avg`.
    pub dark_shading: Vec<u16>,
    /// White multipliers, `WHITE_MAP_RANGE` meaning unity.
    pub white_shading: Vec<u16>,
}

impl CalibrationData {
    fn empty(key: CalibrationKey) -> Self {
        Self {
            key,
            frontend: None,
            offset_converged: true,
            layout: None,
            dark_avg: Vec::new(),
            white_avg: Vec::new(),
            dark_shading: Vec::new(),
            white_shading: Vec::new(),
        }
    }

    pub fn has_shading(&self) -> bool {
        !self.white_shading.is_empty()
    }
}

/// Trial scans on a real device: front-end registers go out with SEND,
/// a trial SCAN buffers one line, READ fetches it.
pub struct DeviceFrontend<'a> {
    t: &'a mut dyn Transport,
    shape: LineShape,
    qualifier: u16,
}

impl<'a> DeviceFrontend<'a> {
    pub fn new(t: &'a mut dyn Transport, shape: LineShape, qualifier: u16) -> Self {
        Self {
            t,
            shape,
            qualifier,
        }
    }
}

impl TrialFrontend for DeviceFrontend<'_> {
    fn set_frontend(&mut self, regs: &FrontendRegisters) -> Result<()> {
        commands::send_data(self.t, data_type::FRONTEND, 0, &regs.encode())
    }

    fn scan_line(&mut self) -> Result<Vec<u8>> {
        commands::start_scan(self.t, scan_flags::TRIAL)?;
        let want = self.shape.len();
        let line = commands::read_data(self.t, data_type::TRIAL_LINE, self.qualifier, want)?;
        if line.len() < want {
            return Err(ScanError::Io(format!(
                "trial line short: {} of {want} bytes",
                line.len()
            )));
        }
        Ok(line)
    }
}

/// Runs the calibration steps a device asks for.
pub struct CalibrationEngine<'a> {
    caps: &'a DeviceCapabilities,
    config: &'a CalibrationConfig,
}

impl<'a> CalibrationEngine<'a> {
    pub fn new(caps: &'a DeviceCapabilities, config: &'a CalibrationConfig) -> Self {
        Self { caps, config }
    }

    #[instrument(skip_all, fields(model = %self.caps.model, mode = mode.label()))]
    pub fn run(
        &self,
        t: &mut dyn Transport,
        mode: ColorMode,
        source: SourceDim,
    ) -> Result<CalibrationData> {
        let key = CalibrationKey::new(mode, source);
        let mut data = CalibrationData::empty(key);
        let q = self.caps.data_qualifier;

        let raw = commands::read_data(t, data_type::CALIB_FORMAT, q, CALIB_FORMAT_LEN)
            .map_err(|e| ScanError::calibration("format", e))?;
        let format =
            CalibrationFormat::parse(&raw).map_err(|e| ScanError::calibration("format", e))?;
        let layout = ShadingLayout::new(&format, mode.is_color());
        debug!(?format, ?layout, "calibration format");

        if self.caps.quirks.analog_frontend {
            let regs = self.frontend(t, &layout, &mut data)?;
            data.frontend = Some(regs);
        }

        if format.shading_required() {
            self.shading(t, &format, &layout, &mut data)
                .map_err(|e| ScanError::calibration("shading", e))?;
            data.layout = Some(layout);
        } else {
            debug!("device reports no shading needed");
        }

        info!(
            shading = data.has_shading(),
            frontend = data.frontend.is_some(),
            offset_converged = data.offset_converged,
            "calibration complete"
        );
        Ok(data)
    }

    fn frontend(
        &self,
        t: &mut dyn Transport,
        layout: &ShadingLayout,
        data: &mut CalibrationData,
    ) -> Result<FrontendRegisters> {
        let cis = self.caps.quirks.cis_sensor;
        let shape = LineShape {
            pixels: layout.pixels,
            channels: layout.channels,
            layout: if cis {
                LineLayout::Planar
            } else {
                LineLayout::Interleaved
            },
        };
        let mut frontend = DeviceFrontend::new(t, shape, self.caps.data_qualifier);

        let off = offset::search_offset(&mut frontend, &shape, self.config)
            .map_err(|e| ScanError::calibration("offset", e))?;
        data.offset_converged = off.converged;
        let g = gain::search_gain(&mut frontend, &shape, off.offset, cis, self.config)
            .map_err(|e| ScanError::calibration("gain", e))?;

        let regs = FrontendRegisters {
            offset: off.offset,
            gain: g.gain,
        };
        frontend
            .set_frontend(&regs)
            .map_err(|e| ScanError::calibration("gain", e))?;
        info!(offset = ?regs.offset, gain = ?regs.gain, "front end calibrated");
        Ok(regs)
    }

    fn shading(
        &self,
        t: &mut dyn Transport,
        format: &CalibrationFormat,
        layout: &ShadingLayout,
        data: &mut CalibrationData,
    ) -> Result<()> {
        let q = self.caps.data_qualifier;
        let target = self.caps.max_shading_target;
        let len = layout.data_len();

        if format.needs_dark() {
            let raw = commands::read_data(t, data_type::CALIB_DARK, q, len)?;
            data.dark_avg = shading::sort_and_average(layout, &raw)?;
            data.dark_shading = shading::compute_dark(&data.dark_avg, format, layout.channels, target);
        }

        let white_type = if layout.channels > 1 {
            data_type::CALIB_COLOR
        } else {
            data_type::CALIB_GRAY
        };
        let raw = commands::read_data(t, white_type, q, len)?;
        let mut white_avg = shading::sort_and_average(layout, &raw)?;
        for (w, d) in white_avg.iter_mut().zip(&data.dark_shading) {
            *w = w.saturating_sub(*d);
        }
        let mut white = shading::compute_white(&white_avg, format, layout.channels, target);
        if format.merge_dark() && !data.dark_shading.is_empty() {
            shading::merge_dark(&mut white, &data.dark_shading);
        }
        shading::upload(t, format, layout, &white, &self.caps.quirks)?;

        data.white_avg = white_avg;
        data.white_shading = white;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::config::TransportConfig;
    use scanwerk_core::ErrorKind;
    use scanwerk_sim::{SimProfile, VirtualScanner};
    use scanwerk_transport::command::opcode;

    use crate::capabilities::{AreaPolicy, DeviceQuirks};

    fn attach(profile: SimProfile) -> (VirtualScanner, Box<dyn Transport>, DeviceCapabilities) {
        let sim = VirtualScanner::new(profile);
        let mut t = sim.block_transport(&TransportConfig::default());
        let quirks = sim.profile().quirks.clone();
        let caps = DeviceCapabilities::query(&mut t, &quirks, AreaPolicy::default()).unwrap();
        (sim, t, caps)
    }

    #[test]
    fn shading_is_computed_and_uploaded() {
        let (sim, mut t, caps) = attach(SimProfile::flatbed());
        let cfg = CalibrationConfig::default();
        let data = CalibrationEngine::new(&caps, &cfg)
            .run(&mut t, ColorMode::Color, SourceDim::Flatbed)
            .unwrap();
        assert!(data.has_shading());
        let layout = data.layout.unwrap();
        assert_eq!(layout.channels, 3);
        assert_eq!(data.white_shading.len(), layout.elements());

        let uploads = sim.sent_with(opcode::SEND, data_type::CALIB_UPLOAD);
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].len(), layout.elements() * 2);
    }

    #[test]
    fn multi_command_devices_upload_per_channel() {
        let mut profile = SimProfile::flatbed();
        profile.calib_multi_command = true;
        let (sim, mut t, caps) = attach(profile);
        let cfg = CalibrationConfig::default();
        let data = CalibrationEngine::new(&caps, &cfg)
            .run(&mut t, ColorMode::Color, SourceDim::Flatbed)
            .unwrap();
        let uploads = sim.sent_with(opcode::SEND, data_type::CALIB_UPLOAD);
        assert_eq!(uploads.len(), 3);
        assert_eq!(uploads[0].len(), data.layout.unwrap().pixels * 2);
    }

    #[test]
    fn analog_frontend_is_searched_and_programmed() {
        let mut profile = SimProfile::flatbed();
        profile.quirks = DeviceQuirks {
            analog_frontend: true,
            ..DeviceQuirks::default()
        };
        let (sim, mut t, caps) = attach(profile);
        let cfg = CalibrationConfig::default();
        let data = CalibrationEngine::new(&caps, &cfg)
            .run(&mut t, ColorMode::Gray, SourceDim::Flatbed)
            .unwrap();
        let regs = data.frontend.unwrap();
        assert!(data.offset_converged);
        assert_eq!(sim.frontend(), regs);
    }

    #[test]
    fn transport_failure_is_a_calibration_error() {
        let (sim, mut t, caps) = attach(SimProfile::flatbed());
        sim.fail_next_reads_of(data_type::CALIB_COLOR, ErrorKind::IoError);
        let cfg = CalibrationConfig::default();
        let err = CalibrationEngine::new(&caps, &cfg)
            .run(&mut t, ColorMode::Color, SourceDim::Flatbed)
            .unwrap_err();
        assert!(matches!(err, ScanError::Calibration { step: "shading", .. }));
        assert_eq!(err.kind(), ErrorKind::IoError);
    }
}

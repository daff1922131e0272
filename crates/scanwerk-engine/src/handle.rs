// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Consumer API.
//
// An open device handle: set options, query parameters, start, read, cancel,
// close. Options are validated against the device before they are stored, so
// a bad value never reaches the scan session.

use std::sync::Arc;

use scanwerk_core::{
    ColorMode, EngineConfig, IoMode, ReadStatus, Result, ScanArea, ScanError, ScanParameters,
    ScanRequest, SessionState, SourceMode,
};
use scanwerk_transport::Transport;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capabilities::DeviceCapabilities;
use crate::registry::DeviceRegistry;
use crate::session::ScanSession;
use crate::window::ScanGeometry;

/// One recognised option with its value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "option", content = "value", rename_all = "snake_case")]
pub enum ScanOption {
    Resolution(u32),
    Mode(ColorMode),
    Source(SourceMode),
    Area(ScanArea),
    Preview(bool),
    AdfFlip(bool),
    /// Millimetres added before the sheet on feeder scans.
    OverscanTop(f64),
    OverscanBottom(f64),
}

impl ScanOption {
    fn apply(self, req: &mut ScanRequest) {
        match self {
            Self::Resolution(dpi) => req.resolution = dpi,
            Self::Mode(mode) => req.mode = mode,
            Self::Source(source) => req.source = source,
            Self::Area(area) => req.area = area,
            Self::Preview(on) => req.preview = on,
            Self::AdfFlip(on) => req.adf_flip = on,
            Self::OverscanTop(mm) => req.overscan_top = mm,
            Self::OverscanBottom(mm) => req.overscan_bottom = mm,
        }
    }

    fn validate(&self, caps: &DeviceCapabilities) -> Result<()> {
        match *self {
            Self::Resolution(dpi) if dpi == 0 || dpi > caps.max_res => Err(
                ScanError::InvalidParameter(format!("resolution {dpi} outside 1..={}", caps.max_res)),
            ),
            Self::Mode(mode) if !caps.supports_mode(mode) => Err(ScanError::Unsupported(format!(
                "{} mode not offered by {}",
                mode.label(),
                caps.model
            ))),
            Self::Source(source) if !caps.supports_source(source) => {
                Err(ScanError::Unsupported(format!(
                    "{} source not offered by {}",
                    source.label(),
                    caps.model
                )))
            }
            Self::AdfFlip(true) if !caps.features.duplex => Err(ScanError::Unsupported(
                "sheet flipping needs a duplex feeder".into(),
            )),
            Self::OverscanTop(mm) | Self::OverscanBottom(mm) if !(0.0..=4.0).contains(&mm) => Err(
                ScanError::InvalidParameter(format!("overscan {mm} mm outside 0..=4 mm")),
            ),
            _ => Ok(()),
        }
    }
}

pub struct ScannerHandle {
    name: String,
    session: ScanSession,
}

impl ScannerHandle {
    /// Open an attached device. `transport` must reach the device named.
    pub fn open(
        registry: &DeviceRegistry,
        name: &str,
        transport: Box<dyn Transport>,
        config: EngineConfig,
    ) -> Result<Self> {
        let record = registry
            .get(name)
            .ok_or_else(|| ScanError::InvalidParameter(format!("no device named {name:?}")))?;
        let session = ScanSession::new(Arc::clone(&record.caps), transport, config);
        let mut handle = Self {
            name: name.to_string(),
            session,
        };
        handle.apply_defaults()?;
        info!(device = name, session = %handle.session.id(), "handle opened");
        Ok(handle)
    }

    /// Start from the whole first source area at a resolution the device takes.
    fn apply_defaults(&mut self) -> Result<()> {
        let caps = self.session.capabilities();
        let source = caps.sources.first().copied().unwrap_or(SourceMode::Flatbed);
        let range = caps.range(source.dim());
        let mode = if caps.supports_mode(ColorMode::Color) {
            ColorMode::Color
        } else {
            caps.color_modes.first().copied().unwrap_or(ColorMode::Gray)
        };
        let req = ScanRequest {
            resolution: caps.optical_res.min(caps.max_res).min(300).max(1),
            area: ScanArea::new(0.0, 0.0, range.x_mm, range.y_mm),
            mode,
            source,
            ..ScanRequest::default()
        };
        self.session.set_request(req)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        self.session.capabilities()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn request(&self) -> &ScanRequest {
        self.session.request()
    }

    /// Set one option. The combined request must still give a valid window.
    pub fn set_option(&mut self, option: ScanOption) -> Result<()> {
        option.validate(self.session.capabilities())?;
        let mut req = *self.session.request();
        option.apply(&mut req);
        // Switching source keeps the area inside the new source's range.
        if let ScanOption::Source(source) = option {
            let range = self.session.capabilities().range(source.dim());
            req.area = ScanArea::new(
                req.area.tl_x.min(range.x_mm),
                req.area.tl_y.min(range.y_mm),
                req.area.br_x.min(range.x_mm),
                req.area.br_y.min(range.y_mm),
            );
        }
        debug!(?option, "set option");
        self.session.set_request(req)
    }

    /// Replace the whole request at once.
    pub fn set_request(&mut self, request: ScanRequest) -> Result<()> {
        self.session.set_request(request)
    }

    pub fn parameters(&self) -> Result<ScanParameters> {
        self.session.parameters()
    }

    /// Geometry the current request maps to on this device.
    pub fn geometry(&self) -> Result<ScanGeometry> {
        ScanGeometry::compute(self.session.request(), self.session.capabilities())
    }

    pub fn start(&mut self) -> Result<()> {
        self.session.start()
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus> {
        self.session.read(buf)
    }

    /// Read the rest of the current page.
    pub fn read_page(&mut self) -> Result<Vec<u8>> {
        let mut page = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match self.session.read(&mut buf)? {
                ReadStatus::Data(n) => page.extend_from_slice(&buf[..n]),
                ReadStatus::WouldBlock => {
                    self.session.wait_readable(std::time::Duration::from_millis(100));
                }
                ReadStatus::Eof => return Ok(page),
            }
        }
    }

    pub fn set_io_mode(&mut self, mode: IoMode) {
        self.session.set_io_mode(mode);
    }

    /// Whether another page of the current feeder job can be started.
    pub fn rear_pending(&self) -> bool {
        self.session.rear_pending()
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn cancel(&mut self) {
        self.session.cancel();
    }

    /// Close the handle, returning the transport for reuse.
    pub fn close(self) -> Option<Box<dyn Transport>> {
        info!(device = %self.name, "handle closed");
        self.session.close()
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan session state machine.
//
// Idle -> Configuring -> Calibrating -> WindowSet -> Scanning -> Draining ->
// Completed | Cancelled | Failed. A finished feeder page returns to WindowSet
// so the next page can start without recalibrating. Cancel always ends in
// Cancelled and only returns once the reader task has stopped.
//
// The session owns the transport between pages and lends it to the reader
// task for the length of a page.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scanwerk_core::{
    EngineConfig, ErrorKind, IoMode, ReadStatus, Result, ScanError, ScanParameters, ScanRequest,
    SessionId, SessionState,
};
use scanwerk_transport::Transport;
use tracing::{debug, info, instrument, warn};

use crate::calibration::{CalibrationData, CalibrationEngine, CalibrationKey};
use crate::capabilities::DeviceCapabilities;
use crate::commands;
use crate::pipe::{PipeReader, byte_pipe};
use crate::reader::{JobOptions, ReaderJob, is_flipping_duplex};
use crate::spool::RearSpool;
use crate::task::ReaderTask;
use crate::window::ScanGeometry;

const READY_ATTEMPTS: u32 = 10;
const READY_DELAY: Duration = Duration::from_secs(1);

pub struct ScanSession {
    id: SessionId,
    caps: Arc<DeviceCapabilities>,
    config: EngineConfig,
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    request: ScanRequest,
    geometry: Option<ScanGeometry>,
    calibration: Option<CalibrationData>,
    io_mode: IoMode,
    /// Pages completed in the current feeder job.
    page: u32,
    /// The spool holds a rear page not yet delivered.
    rear_valid: bool,
    /// The running page is a rear-page replay.
    replaying: bool,
    spool: Option<RearSpool>,
    task: Option<ReaderTask>,
    pipe: Option<PipeReader>,
    last_error: Option<ErrorKind>,
    started_at: Option<DateTime<Utc>>,
}

impl ScanSession {
    pub fn new(
        caps: Arc<DeviceCapabilities>,
        transport: Box<dyn Transport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            id: SessionId::new(),
            caps,
            config,
            transport: Some(transport),
            state: SessionState::Idle,
            request: ScanRequest::default(),
            geometry: None,
            calibration: None,
            io_mode: IoMode::Blocking,
            page: 0,
            rear_valid: false,
            replaying: false,
            spool: None,
            task: None,
            pipe: None,
            last_error: None,
            started_at: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    pub fn request(&self) -> &ScanRequest {
        &self.request
    }

    /// Pages delivered in the current feeder job.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Whether a spooled rear page is waiting to be read.
    pub fn rear_pending(&self) -> bool {
        self.rear_valid
    }

    pub fn calibration(&self) -> Option<&CalibrationData> {
        self.calibration.as_ref()
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    fn busy(&self) -> bool {
        self.task.is_some() || !self.state.is_quiescent()
    }

    /// Replace the scan request. A different request ends any feeder job in
    /// progress.
    pub fn set_request(&mut self, request: ScanRequest) -> Result<()> {
        if self.busy() {
            return Err(ScanError::DeviceBusy);
        }
        ScanGeometry::compute(&request, &self.caps)?;
        if request != self.request {
            self.request = request;
            self.page = 0;
            self.rear_valid = false;
            self.spool = None;
            self.geometry = None;
        }
        Ok(())
    }

    /// Geometry of the running page, or what the current request would give.
    pub fn parameters(&self) -> Result<ScanParameters> {
        match (&self.geometry, self.busy()) {
            (Some(g), true) => Ok(g.parameters()),
            _ => Ok(ScanGeometry::compute(&self.request, &self.caps)?.parameters()),
        }
    }

    pub fn set_io_mode(&mut self, mode: IoMode) {
        self.io_mode = mode;
    }

    pub fn io_mode(&self) -> IoMode {
        self.io_mode
    }

    /// Start the next page: the first page of a job, the next feeder sheet,
    /// or the rear side of the last duplex sheet.
    #[instrument(skip_all, fields(session = %self.id, page = self.page))]
    pub fn start(&mut self) -> Result<()> {
        if self.busy() {
            return Err(ScanError::DeviceBusy);
        }
        self.state = SessionState::Configuring;
        match self.start_page() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    fn start_page(&mut self) -> Result<()> {
        let caps = Arc::clone(&self.caps);
        let geometry = ScanGeometry::compute(&self.request, &caps)?;
        let duplex_pair = geometry.interlaced_duplex || is_flipping_duplex(&geometry, &caps);
        let rear_replay = self.rear_valid && duplex_pair;

        if rear_replay {
            debug!("rear page comes from the spool");
        } else {
            self.rear_valid = false;
            self.spool = None;
            self.prepare_device(&geometry)?;
        }

        let job = ReaderJob::build(
            &geometry,
            &caps,
            JobOptions {
                preview: self.request.preview,
                adf_flip: self.request.adf_flip,
                rear_replay,
                calibration: self.calibration.as_ref(),
                spool_dir: self.config.spool_dir.clone(),
            },
        );
        let transport = self
            .transport
            .take()
            .ok_or_else(|| ScanError::Io("device handle lost by an earlier reader task".into()))?;
        let (writer, reader) = byte_pipe(self.config.pipe_capacity);
        let task = ReaderTask::spawn(job, transport, self.spool.take(), writer)?;

        info!(
            pixels = geometry.pixels_per_line,
            lines = geometry.lines,
            mode = geometry.mode.label(),
            source = geometry.source.label(),
            rear_replay,
            "page started"
        );
        self.geometry = Some(geometry);
        self.replaying = rear_replay;
        self.task = Some(task);
        self.pipe = Some(reader);
        self.started_at = Some(Utc::now());
        self.state = SessionState::Scanning;
        Ok(())
    }

    /// Readiness, media, calibration and window for a device pass.
    fn prepare_device(&mut self, geometry: &ScanGeometry) -> Result<()> {
        let caps = Arc::clone(&self.caps);
        let key = CalibrationKey::new(geometry.mode, geometry.source.dim());
        let calibrate = self.calibration_needed(key);
        let t = self
            .transport
            .as_deref_mut()
            .ok_or_else(|| ScanError::Io("device handle lost by an earlier reader task".into()))?;

        commands::wait_ready(t, READY_ATTEMPTS, READY_DELAY)?;
        if geometry.source.is_adf() {
            commands::media_check(t)?;
        }

        if calibrate {
            self.state = SessionState::Calibrating;
            let data = CalibrationEngine::new(&caps, &self.config.calibration).run(
                t,
                geometry.mode,
                geometry.source.dim(),
            )?;
            info!(
                shading = data.has_shading(),
                offset_converged = data.offset_converged,
                "calibration complete"
            );
            self.calibration = Some(data);
        }

        if self.page > 0 && caps.features.keeps_window {
            debug!("device keeps the window between pages");
        } else {
            let window = geometry.window(&caps, self.request.adf_flip).encode();
            commands::set_window(t, &window)?;
        }
        self.state = SessionState::WindowSet;
        Ok(())
    }

    fn calibration_needed(&self, key: CalibrationKey) -> bool {
        if self.config.disable_calibration {
            return false;
        }
        if !self.caps.wants_calibration() && !self.config.force_calibration {
            return false;
        }
        if self.page == 0 || !self.caps.features.keeps_calibration {
            return true;
        }
        let current = self.calibration.as_ref().map(|c| c.key);
        current != Some(key)
    }

    /// Copy the next bytes of the page into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus> {
        let Some(pipe) = self.pipe.as_mut() else {
            return match self.state {
                SessionState::Completed | SessionState::WindowSet if self.geometry.is_some() => {
                    Ok(ReadStatus::Eof)
                }
                SessionState::Cancelled => Err(ScanError::Cancelled),
                SessionState::Failed => Err(ScanError::from_kind(
                    self.last_error.unwrap_or(ErrorKind::IoError),
                    "scan failed",
                )),
                _ => Err(ScanError::InvalidParameter("no scan in progress".into())),
            };
        };
        match pipe.read(buf, self.io_mode) {
            ReadStatus::Eof => {
                self.finish_page()?;
                Ok(ReadStatus::Eof)
            }
            status => Ok(status),
        }
    }

    /// Wait up to `timeout` for page data; `true` when a read would not block.
    pub fn wait_readable(&mut self, timeout: Duration) -> bool {
        self.pipe.as_mut().is_none_or(|p| p.wait_readable(timeout))
    }

    fn finish_page(&mut self) -> Result<()> {
        self.state = SessionState::Draining;
        self.pipe = None;
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        let outcome = task.join();
        self.transport = outcome.transport;
        self.spool = outcome.spool;
        if let Err(err) = outcome.status {
            self.fail(&err);
            return Err(err);
        }

        let Some(geometry) = self.geometry.as_ref() else {
            return Ok(());
        };
        if self.replaying {
            self.rear_valid = false;
            self.spool = None;
        } else {
            self.rear_valid = self.spool.is_some();
        }
        if geometry.source.is_adf() {
            self.page += 1;
            self.state = SessionState::WindowSet;
        } else {
            self.page = 0;
            self.state = SessionState::Completed;
        }
        info!(page = self.page, rear_pending = self.rear_valid, "page complete");
        Ok(())
    }

    /// Stop the scan. Returns once the reader task has released the device.
    #[instrument(skip_all, fields(session = %self.id))]
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            self.state = SessionState::Draining;
            task.request_cancel();
            // A reader blocked on a full pipe wakes up when the pipe closes.
            self.pipe = None;
            let timeout = self.config.cancel_ack_timeout();
            if !task.wait_done(timeout) {
                warn!(?timeout, "reader task slow to acknowledge cancel");
            }
            let outcome = task.join();
            self.transport = outcome.transport;
            if let Err(err) = outcome.status {
                if err.kind() != ErrorKind::Cancelled {
                    debug!(error = %err, "reader stopped with error during cancel");
                }
            }
        }
        self.pipe = None;
        self.spool = None;
        self.page = 0;
        self.rear_valid = false;
        self.replaying = false;
        self.state = SessionState::Cancelled;
        info!("session cancelled");
    }

    /// End the session and hand the transport back.
    pub fn close(mut self) -> Option<Box<dyn Transport>> {
        if self.task.is_some() {
            self.cancel();
        }
        self.transport.take()
    }

    fn fail(&mut self, err: &ScanError) {
        let kind = err.kind();
        if kind == ErrorKind::Cancelled {
            self.state = SessionState::Cancelled;
        } else {
            warn!(error = %err, %kind, "scan failed");
            self.state = SessionState::Failed;
        }
        self.last_error = Some(kind);
        self.page = 0;
        self.rear_valid = false;
        self.replaying = false;
        self.spool = None;
        self.pipe = None;
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel();
        }
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stream transport: commands, payloads and responses travel over a bulk pipe
// and every command ends with a one-byte status read from either the bulk or
// the interrupt endpoint.
//
// Status bytes: 0 good, 2 request sense required, 8 busy.

use std::time::Duration;

use scanwerk_core::config::TransportConfig;
use scanwerk_core::{Result, ScanError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::channel::{Transport, TransportKind};
use crate::command::{Command, CommandClass, SENSE_LEN, opcode};
use crate::retry::{RetryConfig, with_retry};
use crate::sense::SenseData;

/// Status byte values.
pub mod status {
    pub const GOOD: u8 = 0x00;
    pub const NEEDS_SENSE: u8 = 0x02;
    pub const BUSY: u8 = 0x08;
}

const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Failure reported by the pipe primitive.
#[derive(Debug, Error)]
pub enum PipeFault {
    #[error("timed out")]
    Timeout,
    #[error("endpoint stalled")]
    Stall,
    #[error("pipe error: {0}")]
    Io(String),
}

/// Contract of the OS-provided USB transfer primitive.
pub trait UsbPipe: Send {
    fn set_timeout(&mut self, timeout: Duration);
    fn write_bulk(&mut self, data: &[u8]) -> std::result::Result<usize, PipeFault>;
    fn read_bulk(&mut self, buf: &mut [u8]) -> std::result::Result<usize, PipeFault>;
    fn read_interrupt(&mut self, buf: &mut [u8]) -> std::result::Result<usize, PipeFault>;
}

/// Endpoint the device reports status on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatusEndpoint {
    /// Not characterised yet: try bulk, then interrupt.
    #[default]
    Untested,
    Bulk,
    Interrupt,
}

/// `Transport` over a [`UsbPipe`].
pub struct StreamTransport<P> {
    pipe: P,
    status_endpoint: StatusEndpoint,
    retry: RetryConfig,
    config: TransportConfig,
}

fn pipe_err(what: &str, fault: PipeFault) -> ScanError {
    ScanError::Io(format!("{what}: {fault}"))
}

impl<P: UsbPipe> StreamTransport<P> {
    pub fn new(pipe: P, config: &TransportConfig) -> Self {
        Self {
            pipe,
            status_endpoint: StatusEndpoint::Untested,
            retry: RetryConfig::from(config),
            config: config.clone(),
        }
    }

    /// Skip endpoint probing for devices known to report on one endpoint.
    pub fn with_status_endpoint(mut self, endpoint: StatusEndpoint) -> Self {
        self.status_endpoint = endpoint;
        self
    }

    pub fn status_endpoint(&self) -> StatusEndpoint {
        self.status_endpoint
    }

    pub fn into_inner(self) -> P {
        self.pipe
    }

    fn data_timeout(&self, cmd: &Command) -> Duration {
        match cmd.class() {
            CommandClass::Inquiry => self.config.inquiry_timeout(),
            CommandClass::Readiness => self.config.readiness_timeout(),
            CommandClass::Standard => self.config.standard_timeout(),
        }
    }

    fn status_timeout(&self, cmd: &Command) -> Duration {
        match cmd.class() {
            CommandClass::Inquiry => self.config.inquiry_timeout(),
            CommandClass::Readiness => self.config.readiness_timeout(),
            CommandClass::Standard => self.config.status_timeout(),
        }
    }

    fn frame(&self, cmd: &Command) -> Vec<u8> {
        let mut block = cmd.encode();
        if block.len() < self.config.min_frame {
            block.resize(self.config.min_frame, 0);
        }
        block
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let n = self
                .pipe
                .write_bulk(rest)
                .map_err(|e| pipe_err("bulk write", e))?;
            if n == 0 {
                return Err(ScanError::Io("bulk write accepted no bytes".into()));
            }
            rest = &rest[n.min(rest.len())..];
        }
        Ok(())
    }

    /// Write, draining any stale status byte when the write fails.
    fn write_or_drain(&mut self, data: &[u8]) -> Result<()> {
        if let Err(err) = self.write_all(data) {
            warn!(error = %err, "write failed, draining status");
            self.drain_status();
            return Err(err);
        }
        Ok(())
    }

    /// Read one bulk chunk of the data phase, draining on failure.
    fn read_or_drain(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.pipe.read_bulk(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                let err = pipe_err("bulk read", e);
                warn!(error = %err, "read failed, draining status");
                self.drain_status();
                Err(err)
            }
        }
    }

    fn drain_status(&mut self) {
        self.pipe.set_timeout(DRAIN_TIMEOUT);
        match self.read_status() {
            Ok(byte) => debug!(status = byte, "drained status byte"),
            Err(drain) => debug!(error = %drain, "nothing to drain"),
        }
    }

    /// Poll one status byte, characterising the endpoint on first success.
    fn read_status(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        if matches!(
            self.status_endpoint,
            StatusEndpoint::Untested | StatusEndpoint::Bulk
        ) {
            match self.pipe.read_bulk(&mut byte) {
                Ok(1) => {
                    if self.status_endpoint == StatusEndpoint::Untested {
                        debug!("status endpoint characterised as bulk");
                        self.status_endpoint = StatusEndpoint::Bulk;
                    }
                    return Ok(byte[0]);
                }
                Ok(n) => debug!(bytes = n, "bulk status read returned no status"),
                Err(e) => debug!(error = %e, "bulk status read failed"),
            }
        }
        if matches!(
            self.status_endpoint,
            StatusEndpoint::Untested | StatusEndpoint::Interrupt
        ) {
            match self.pipe.read_interrupt(&mut byte) {
                Ok(1) => {
                    if self.status_endpoint == StatusEndpoint::Untested {
                        debug!("status endpoint characterised as interrupt");
                        self.status_endpoint = StatusEndpoint::Interrupt;
                    }
                    return Ok(byte[0]);
                }
                Ok(n) => debug!(bytes = n, "interrupt status read returned no status"),
                Err(e) => debug!(error = %e, "interrupt status read failed"),
            }
        }
        Err(ScanError::Io("no status byte from device".into()))
    }

    fn request_sense(&mut self) -> Result<SenseData> {
        let cmd = Command::new(opcode::REQUEST_SENSE).with_transfer_len(SENSE_LEN)?;
        let block = self.frame(&cmd);
        self.pipe.set_timeout(self.config.status_timeout());
        self.write_all(&block)?;
        let mut raw = vec![0u8; SENSE_LEN];
        let mut filled = 0;
        while filled < SENSE_LEN {
            let n = self
                .pipe
                .read_bulk(&mut raw[filled..])
                .map_err(|e| pipe_err("sense read", e))?;
            if n == 0 {
                return Err(ScanError::Io("sense read returned no data".into()));
            }
            filled += n;
        }
        let sense_status = self.read_status()?;
        if sense_status != status::GOOD {
            return Err(ScanError::Io(format!(
                "request sense ended with status {sense_status:#04x}"
            )));
        }
        SenseData::parse(&raw)
    }

    fn attempt(&mut self, cmd: &Command, out: Option<&[u8]>, in_len: usize) -> Result<Vec<u8>> {
        let block = self.frame(cmd);
        self.pipe.set_timeout(self.data_timeout(cmd));
        self.write_or_drain(&block)?;

        if let Some(payload) = out {
            for chunk in payload.chunks(self.config.max_transfer.max(1)) {
                self.write_or_drain(chunk)?;
            }
        }

        let mut data = Vec::with_capacity(in_len);
        while data.len() < in_len {
            let want = (in_len - data.len()).min(self.config.max_transfer.max(1));
            let mut buf = vec![0u8; want];
            let n = self.read_or_drain(&mut buf)?;
            if n == 0 {
                return Err(ScanError::Io("bulk read returned no data".into()));
            }
            if n == 1 && in_len - data.len() > 1 {
                // The device gave up the data phase and sent its status byte.
                return Err(self.abandoned_data_phase(buf[0], data.len(), in_len));
            }
            data.extend_from_slice(&buf[..n]);
        }

        self.pipe.set_timeout(self.status_timeout(cmd));
        let byte = self.read_status()?;
        match byte {
            status::GOOD => Ok(data),
            status::NEEDS_SENSE => {
                self.request_sense()?.into_result()?;
                Ok(data)
            }
            status::BUSY => Err(ScanError::DeviceBusy),
            other => Err(ScanError::Io(format!("unknown status byte {other:#04x}"))),
        }
    }

    /// Error for a status byte that arrived before the data was complete.
    /// The partial data is dropped and the command is sent again, unless
    /// the device has sense to report.
    fn abandoned_data_phase(&mut self, byte: u8, got: usize, want: usize) -> ScanError {
        warn!(status = byte, got, want, "status byte inside data phase");
        if byte == status::NEEDS_SENSE {
            match self.request_sense().and_then(|sense| sense.into_result()) {
                Err(err) => return err,
                Ok(()) => debug!("sense reported no condition"),
            }
        }
        ScanError::Io(format!(
            "data phase ended after {got} of {want} bytes with status {byte:#04x}"
        ))
    }
}

impl<P: UsbPipe> Transport for StreamTransport<P> {
    fn send(&mut self, cmd: &Command, out: Option<&[u8]>, in_len: usize) -> Result<Vec<u8>> {
        debug!(
            opcode = cmd.opcode,
            data_type = cmd.data_type,
            out_len = out.map_or(0, <[u8]>::len),
            in_len,
            "stream command"
        );
        let retry = self.retry.clone();
        with_retry(&retry, |_| self.attempt(cmd, out, in_len))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn max_transfer(&self) -> usize {
        self.config.max_transfer
    }
}

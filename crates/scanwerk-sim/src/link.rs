// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The two physical links to the virtual firmware: a SCSI-style bus and a
// USB-style bulk pipe. Both implement the OS primitive the real transports
// sit on, so the engine runs unchanged against them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use scanwerk_transport::command::opcode;
use scanwerk_transport::stream::status;
use scanwerk_transport::{BusFault, Command, PipeFault, ScsiBus, UsbPipe};
use tracing::trace;

use crate::firmware::{Fault, Firmware};

/// Status byte the pipe reports for a bus-level failure. Not a valid status.
const STATUS_BUS_ERROR: u8 = 0xff;

pub(crate) type SharedFirmware = Arc<Mutex<Firmware>>;

pub(crate) fn lock(fw: &SharedFirmware) -> MutexGuard<'_, Firmware> {
    fw.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Block bus
// ---------------------------------------------------------------------------

/// [`ScsiBus`] wired to a virtual scanner.
pub struct SimScsiBus {
    fw: SharedFirmware,
}

impl SimScsiBus {
    pub(crate) fn new(fw: SharedFirmware) -> Self {
        Self { fw }
    }
}

impl ScsiBus for SimScsiBus {
    fn execute(
        &mut self,
        cdb: &[u8],
        data_out: &[u8],
        data_in_len: usize,
        _timeout: Duration,
    ) -> Result<Vec<u8>, BusFault> {
        let cmd = Command::decode(cdb)
            .ok_or_else(|| BusFault::Io(format!("undecodable command block of {} bytes", cdb.len())))?;
        match lock(&self.fw).execute(&cmd, data_out, data_in_len) {
            Ok(data) => Ok(data),
            Err(Fault::Busy) => Err(BusFault::Busy),
            Err(Fault::Io(detail)) => Err(BusFault::Io(detail)),
            Err(Fault::Check(_)) => Err(BusFault::CheckCondition),
        }
    }

    fn request_sense(&mut self) -> Result<Vec<u8>, BusFault> {
        Ok(lock(&self.fw).take_sense().encode().to_vec())
    }
}

// ---------------------------------------------------------------------------
// Stream pipe
// ---------------------------------------------------------------------------

/// [`UsbPipe`] wired to a virtual scanner.
///
/// Replies are queued as segments: the data phase, then a one-byte status.
/// A bulk read never crosses a segment boundary, which is how a short data
/// phase shows up as a lone status byte.
pub struct SimUsbPipe {
    fw: SharedFirmware,
    /// Command waiting for its outgoing payload.
    pending: Option<(Command, Vec<u8>)>,
    replies: VecDeque<Vec<u8>>,
    timeout: Duration,
}

impl SimUsbPipe {
    pub(crate) fn new(fw: SharedFirmware) -> Self {
        Self {
            fw,
            pending: None,
            replies: VecDeque::new(),
            timeout: Duration::ZERO,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn run(&mut self, cmd: &Command, out: &[u8]) {
        let in_len = match cmd.opcode {
            opcode::READ | opcode::INQUIRY | opcode::MEDIA_CHECK | opcode::REQUEST_SENSE => {
                cmd.transfer_len as usize
            }
            _ => 0,
        };
        let mut fw = lock(&self.fw);
        let status = match fw.execute(cmd, out, in_len) {
            Ok(data) => {
                let short = cmd.opcode == opcode::READ && data.len() < in_len;
                if !data.is_empty() {
                    self.replies.push_back(data);
                }
                if short && fw.end_short_image_read() {
                    status::NEEDS_SENSE
                } else {
                    status::GOOD
                }
            }
            Err(Fault::Busy) => status::BUSY,
            Err(Fault::Io(_)) => STATUS_BUS_ERROR,
            Err(Fault::Check(_)) => status::NEEDS_SENSE,
        };
        drop(fw);
        trace!(opcode = cmd.opcode, status, "sim pipe status");
        self.replies.push_back(vec![status]);
    }
}

impl UsbPipe for SimUsbPipe {
    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn write_bulk(&mut self, data: &[u8]) -> Result<usize, PipeFault> {
        if let Some((cmd, mut payload)) = self.pending.take() {
            payload.extend_from_slice(data);
            if payload.len() >= cmd.transfer_len as usize {
                self.run(&cmd, &payload);
            } else {
                self.pending = Some((cmd, payload));
            }
            return Ok(data.len());
        }

        let cmd = Command::decode(data)
            .ok_or_else(|| PipeFault::Io(format!("undecodable frame of {} bytes", data.len())))?;
        // A new command discards whatever the host left unread.
        self.replies.clear();
        let takes_payload = matches!(cmd.opcode, opcode::SEND | opcode::SET_WINDOW);
        if takes_payload && cmd.transfer_len > 0 {
            self.pending = Some((cmd, Vec::with_capacity(cmd.transfer_len as usize)));
        } else {
            self.run(&cmd, &[]);
        }
        Ok(data.len())
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize, PipeFault> {
        let Some(mut segment) = self.replies.pop_front() else {
            return Err(PipeFault::Timeout);
        };
        let n = segment.len().min(buf.len());
        buf[..n].copy_from_slice(&segment[..n]);
        if n < segment.len() {
            segment.drain(..n);
            self.replies.push_front(segment);
        }
        Ok(n)
    }

    fn read_interrupt(&mut self, _buf: &mut [u8]) -> Result<usize, PipeFault> {
        Err(PipeFault::Stall)
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device command helpers.
//
// Each helper builds one command block, runs it through a `Transport` and
// interprets the reply. Nothing here holds state.

use std::time::Duration;

use scanwerk_core::{ErrorKind, Result, ScanError};
use scanwerk_transport::command::{Command, data_type, opcode};
use scanwerk_transport::Transport;
use tracing::{debug, warn};

pub use scanwerk_transport::command::scan_flags;

/// OBJECT POSITION targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectPosition {
    Reject = 0,
    Load = 1,
    GoHome = 2,
}

/// Read an inquiry block of `len` bytes. A short reply is asked for once more.
pub fn inquiry(t: &mut dyn Transport, len: usize) -> Result<Vec<u8>> {
    let cmd = Command::new(opcode::INQUIRY).with_transfer_len(len)?;
    let mut last_len = 0;
    for attempt in 1..=2 {
        let data = t.read(&cmd, len)?;
        if data.len() >= len {
            return Ok(data);
        }
        last_len = data.len();
        warn!(attempt, got = data.len(), want = len, "short inquiry reply");
    }
    Err(ScanError::Io(format!(
        "inquiry returned {last_len} of {len} bytes"
    )))
}

pub fn test_unit_ready(t: &mut dyn Transport) -> Result<()> {
    t.command(&Command::new(opcode::TEST_UNIT_READY))
}

/// Poll TEST UNIT READY until the device answers or `attempts` run out.
pub fn wait_ready(t: &mut dyn Transport, attempts: u32, delay: Duration) -> Result<()> {
    let mut last = None;
    for attempt in 1..=attempts.max(1) {
        match test_unit_ready(t) {
            Ok(()) => return Ok(()),
            Err(err) if matches!(err.kind(), ErrorKind::DeviceBusy | ErrorKind::IoError) => {
                debug!(attempt, error = %err, "device not ready");
                last = Some(err);
                if attempt < attempts && !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(last.unwrap_or(ScanError::DeviceBusy))
}

pub fn reserve_unit(t: &mut dyn Transport) -> Result<()> {
    t.command(&Command::new(opcode::RESERVE_UNIT))
}

pub fn release_unit(t: &mut dyn Transport) -> Result<()> {
    t.command(&Command::new(opcode::RELEASE_UNIT))
}

/// Fails with `NoMedia` when the feeder is empty.
pub fn media_check(t: &mut dyn Transport) -> Result<()> {
    let cmd = Command::new(opcode::MEDIA_CHECK).with_transfer_len(1)?;
    let reply = t.read(&cmd, 1)?;
    match reply.first() {
        Some(byte) if byte & 0x01 != 0 => Ok(()),
        _ => Err(ScanError::NoMedia),
    }
}

pub fn start_scan(t: &mut dyn Transport, flags: u8) -> Result<()> {
    let cmd = Command::new(opcode::SCAN)
        .with_qualifier(u16::from(flags))
        .with_transfer_len(1)?;
    t.command(&cmd)
}

pub fn object_position(t: &mut dyn Transport, position: ObjectPosition) -> Result<()> {
    t.command(&Command::new(opcode::OBJECT_POSITION).with_qualifier(position as u16))
}

pub fn set_window(t: &mut dyn Transport, window: &[u8]) -> Result<()> {
    let cmd = Command::new(opcode::SET_WINDOW).with_transfer_len(window.len())?;
    t.write(&cmd, window)
}

/// Read `len` bytes of the given data type, split into transfers the
/// transport can carry. Stops early when the device ends the data phase.
pub fn read_data(
    t: &mut dyn Transport,
    data_type: u8,
    qualifier: u16,
    len: usize,
) -> Result<Vec<u8>> {
    let chunk = t.max_transfer().max(1);
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let want = (len - out.len()).min(chunk);
        let cmd = Command::new(opcode::READ)
            .with_data_type(data_type)
            .with_qualifier(qualifier)
            .with_transfer_len(want)?;
        let got = t.read(&cmd, want)?;
        let short = got.len() < want;
        out.extend_from_slice(&got);
        if short {
            break;
        }
    }
    Ok(out)
}

/// One transfer of raw image data.
pub fn read_image(t: &mut dyn Transport, qualifier: u16, len: usize) -> Result<Vec<u8>> {
    let cmd = Command::new(opcode::READ)
        .with_data_type(data_type::IMAGE)
        .with_qualifier(qualifier)
        .with_transfer_len(len)?;
    t.read(&cmd, len)
}

pub fn send_data(t: &mut dyn Transport, data_type: u8, qualifier: u16, payload: &[u8]) -> Result<()> {
    let cmd = Command::new(opcode::SEND)
        .with_data_type(data_type)
        .with_qualifier(qualifier)
        .with_transfer_len(payload.len())?;
    t.write(&cmd, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_transport::TransportKind;
    use std::collections::VecDeque;

    /// Records every command and replays canned replies.
    struct Recorder {
        sent: Vec<(Command, Vec<u8>)>,
        replies: VecDeque<Result<Vec<u8>>>,
        max_transfer: usize,
    }

    impl Recorder {
        fn new(replies: Vec<Result<Vec<u8>>>) -> Self {
            Self {
                sent: Vec::new(),
                replies: replies.into(),
                max_transfer: 1024,
            }
        }
    }

    impl Transport for Recorder {
        fn send(&mut self, cmd: &Command, out: Option<&[u8]>, _in_len: usize) -> Result<Vec<u8>> {
            self.sent.push((*cmd, out.map(<[u8]>::to_vec).unwrap_or_default()));
            self.replies.pop_front().unwrap_or(Ok(Vec::new()))
        }

        fn kind(&self) -> TransportKind {
            TransportKind::Block
        }

        fn max_transfer(&self) -> usize {
            self.max_transfer
        }
    }

    #[test]
    fn media_check_reports_empty_feeder() {
        let mut t = Recorder::new(vec![Ok(vec![0x00])]);
        assert_eq!(media_check(&mut t).unwrap_err().kind(), ErrorKind::NoMedia);
        let mut t = Recorder::new(vec![Ok(vec![0x01])]);
        media_check(&mut t).unwrap();
    }

    #[test]
    fn inquiry_retries_short_reply_once() {
        let mut t = Recorder::new(vec![Ok(vec![0; 10]), Ok(vec![0; 36])]);
        assert_eq!(inquiry(&mut t, 36).unwrap().len(), 36);
        let mut t = Recorder::new(vec![Ok(vec![0; 10]), Ok(vec![0; 10])]);
        assert_eq!(inquiry(&mut t, 36).unwrap_err().kind(), ErrorKind::IoError);
    }

    #[test]
    fn read_data_splits_by_max_transfer() {
        let mut t = Recorder::new(vec![Ok(vec![1; 4]), Ok(vec![2; 4]), Ok(vec![3; 2])]);
        t.max_transfer = 4;
        let data = read_data(&mut t, data_type::CALIB_COLOR, 0x0a0d, 10).unwrap();
        assert_eq!(data, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3]);
        let lens: Vec<u32> = t.sent.iter().map(|(c, _)| c.transfer_len).collect();
        assert_eq!(lens, vec![4, 4, 2]);
    }

    #[test]
    fn wait_ready_gives_up_after_attempts() {
        let mut t = Recorder::new((0..3).map(|_| Err(ScanError::DeviceBusy)).collect());
        let err = wait_ready(&mut t, 3, Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceBusy);
        assert_eq!(t.sent.len(), 3);
    }

    #[test]
    fn wait_ready_stops_on_cover_open() {
        let mut t = Recorder::new(vec![Err(ScanError::CoverOpen)]);
        assert_eq!(
            wait_ready(&mut t, 10, Duration::ZERO).unwrap_err().kind(),
            ErrorKind::CoverOpen
        );
        assert_eq!(t.sent.len(), 1);
    }

    #[test]
    fn start_scan_carries_flags_in_qualifier() {
        let mut t = Recorder::new(vec![]);
        start_scan(&mut t, scan_flags::PREVIEW).unwrap();
        let (cmd, _) = &t.sent[0];
        assert_eq!(cmd.opcode, opcode::SCAN);
        assert_eq!(cmd.encode()[5], scan_flags::PREVIEW);
        assert_eq!(cmd.encode()[4], 1);
    }

    #[test]
    fn send_data_attaches_payload() {
        let mut t = Recorder::new(vec![]);
        send_data(&mut t, data_type::CALIB_UPLOAD, 0x12, &[1, 2, 3]).unwrap();
        let (cmd, payload) = &t.sent[0];
        assert_eq!(cmd.transfer_len, 3);
        assert_eq!(cmd.qualifier, 0x12);
        assert_eq!(payload, &vec![1, 2, 3]);
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The uniform command/response interface every device speaks through.

use scanwerk_core::Result;
use serde::{Deserialize, Serialize};

use crate::command::Command;

/// Wire shape of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    /// One synchronous request per command, errors via request sense.
    Block,
    /// Bulk byte stream with a polled status byte.
    Stream,
}

/// A command channel to one device.
///
/// `send` transmits `cmd`, then `out` when given, then reads up to `in_len`
/// response bytes. Device status is folded into the result: a good status
/// yields the response payload, anything else the matching `ScanError`.
/// The payload is shorter than `in_len` only when the device ended the data
/// phase early, which happens for image reads at the end of a page.
pub trait Transport: Send {
    fn send(&mut self, cmd: &Command, out: Option<&[u8]>, in_len: usize) -> Result<Vec<u8>>;

    fn kind(&self) -> TransportKind;

    /// Largest data phase a single `send` should request.
    fn max_transfer(&self) -> usize;

    /// Command without data phase.
    fn command(&mut self, cmd: &Command) -> Result<()> {
        self.send(cmd, None, 0).map(|_| ())
    }

    /// Command with an outgoing payload and no response.
    fn write(&mut self, cmd: &Command, payload: &[u8]) -> Result<()> {
        self.send(cmd, Some(payload), 0).map(|_| ())
    }

    /// Command with a response payload.
    fn read(&mut self, cmd: &Command, len: usize) -> Result<Vec<u8>> {
        self.send(cmd, None, len)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, cmd: &Command, out: Option<&[u8]>, in_len: usize) -> Result<Vec<u8>> {
        (**self).send(cmd, out, in_len)
    }

    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn max_transfer(&self) -> usize {
        (**self).max_transfer()
    }
}

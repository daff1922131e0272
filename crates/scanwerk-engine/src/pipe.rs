// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded byte pipe between the reader task and the consumer.
//
// The reader writes whole processed chunks; the consumer reads arbitrary
// byte counts. When the pipe is full the writer blocks, which is the only
// back-pressure the reader needs. End of data is the writer being dropped.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

use scanwerk_core::{IoMode, ReadStatus, Result, ScanError};

/// Create a pipe holding at most `capacity` chunks in flight.
pub fn byte_pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            pending: Vec::new(),
            offset: 0,
            finished: false,
        },
    )
}

pub struct PipeWriter {
    tx: SyncSender<Vec<u8>>,
}

impl PipeWriter {
    /// Queue one chunk, blocking while the pipe is full. Fails with
    /// `Cancelled` once the reading side is gone.
    pub fn write(&mut self, chunk: Vec<u8>) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(chunk).map_err(|_| ScanError::Cancelled)
    }
}

pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
    finished: bool,
}

impl PipeReader {
    fn refill(&mut self, mode: IoMode) -> Option<ReadStatus> {
        let next = match mode {
            IoMode::Blocking => self.rx.recv().ok(),
            IoMode::NonBlocking => match self.rx.try_recv() {
                Ok(chunk) => Some(chunk),
                Err(TryRecvError::Empty) => return Some(ReadStatus::WouldBlock),
                Err(TryRecvError::Disconnected) => None,
            },
        };
        match next {
            Some(chunk) => {
                self.pending = chunk;
                self.offset = 0;
                None
            }
            None => {
                self.finished = true;
                Some(ReadStatus::Eof)
            }
        }
    }

    /// Copy up to `buf.len()` bytes. A short count is normal; `Eof` comes only
    /// after every written byte has been read.
    pub fn read(&mut self, buf: &mut [u8], mode: IoMode) -> ReadStatus {
        if buf.is_empty() {
            return ReadStatus::Data(0);
        }
        while self.offset >= self.pending.len() {
            if self.finished {
                return ReadStatus::Eof;
            }
            if let Some(status) = self.refill(mode) {
                return status;
            }
        }
        let n = buf.len().min(self.pending.len() - self.offset);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        ReadStatus::Data(n)
    }

    /// Wait up to `timeout` for buffered data without consuming it.
    pub fn wait_readable(&mut self, timeout: Duration) -> bool {
        if self.offset < self.pending.len() || self.finished {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => {
                self.pending = chunk;
                self.offset = 0;
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                true
            }
        }
    }
}

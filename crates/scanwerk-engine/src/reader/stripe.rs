// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded stripe buffer.
//
// Holds raw hardware lines of one side until enough look-ahead has arrived
// to pack them. Lines are fixed-size and indices are checked against the
// fill level, so no access can leave the buffer.

use scanwerk_core::{Result, ScanError};

#[derive(Debug)]
pub struct StripeBuffer {
    data: Vec<u8>,
    line_len: usize,
    capacity: usize,
    fill: usize,
}

impl StripeBuffer {
    /// A buffer of `capacity` lines of `line_len` bytes each.
    pub fn new(line_len: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: vec![0u8; line_len * capacity],
            line_len,
            capacity,
            fill: 0,
        }
    }

    pub fn line_len(&self) -> usize {
        self.line_len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lines currently held.
    pub fn len(&self) -> usize {
        self.fill
    }

    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    pub fn is_full(&self) -> bool {
        self.fill == self.capacity
    }

    pub fn push_line(&mut self, line: &[u8]) -> Result<()> {
        if self.is_full() {
            return Err(ScanError::Io("stripe buffer overflow".into()));
        }
        if line.len() != self.line_len {
            return Err(ScanError::Io(format!(
                "line of {} bytes pushed into {}-byte stripe",
                line.len(),
                self.line_len
            )));
        }
        let at = self.fill * self.line_len;
        self.data[at..at + self.line_len].copy_from_slice(line);
        self.fill += 1;
        Ok(())
    }

    pub fn line(&self, index: usize) -> Option<&[u8]> {
        if index >= self.fill {
            return None;
        }
        let at = index * self.line_len;
        self.data.get(at..at + self.line_len)
    }

    /// All held lines as one contiguous slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.fill * self.line_len]
    }

    /// Drop the first `n` lines, moving the rest to the front.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.fill);
        self.data
            .copy_within(n * self.line_len..self.fill * self.line_len, 0);
        self.fill -= n;
    }
}

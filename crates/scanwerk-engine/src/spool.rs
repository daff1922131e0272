// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rear-page spool.
//
// Raw rear-side lines collected during a duplex pass, kept in an anonymous
// temporary file until the rear page is read. The file disappears when the
// spool is dropped.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use scanwerk_core::{Result, ScanError};
use tracing::debug;

#[derive(Debug)]
pub struct RearSpool {
    file: File,
    line_len: usize,
    lines: u64,
    reversed: bool,
    cursor: u64,
}

impl RearSpool {
    /// Create an empty spool in `dir`, or the system temp directory.
    pub fn create(dir: Option<&Path>, line_len: usize) -> Result<Self> {
        if line_len == 0 {
            return Err(ScanError::InvalidParameter("spool line length is zero".into()));
        }
        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        debug!(line_len, "rear spool created");
        Ok(Self {
            file,
            line_len,
            lines: 0,
            reversed: false,
            cursor: 0,
        })
    }

    pub fn line_len(&self) -> usize {
        self.line_len
    }

    /// Lines written so far.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn write_line(&mut self, line: &[u8]) -> Result<()> {
        if line.len() != self.line_len {
            return Err(ScanError::Io(format!(
                "spool line of {} bytes, expected {}",
                line.len(),
                self.line_len
            )));
        }
        self.file.write_all(line)?;
        self.lines += 1;
        Ok(())
    }

    /// Rewind for reading; `reversed` replays the last line first.
    pub fn start_replay(&mut self, reversed: bool) -> Result<()> {
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        self.reversed = reversed;
        self.cursor = 0;
        debug!(lines = self.lines, reversed, "rear spool replay");
        Ok(())
    }

    /// Read the next line into `buf`. Returns `false` once all lines are read.
    pub fn read_line(&mut self, buf: &mut [u8]) -> Result<bool> {
        if self.cursor >= self.lines {
            return Ok(false);
        }
        if buf.len() < self.line_len {
            return Err(ScanError::Io("spool read buffer too small".into()));
        }
        if self.reversed {
            let index = self.lines - 1 - self.cursor;
            self.file
                .seek(SeekFrom::Start(index * self.line_len as u64))?;
        }
        self.file.read_exact(&mut buf[..self.line_len])?;
        self.cursor += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: u8) -> RearSpool {
        let mut s = RearSpool::create(None, 3).unwrap();
        for i in 0..n {
            s.write_line(&[i, i, i]).unwrap();
        }
        s
    }

    #[test]
    fn replays_in_write_order() {
        let mut s = filled(4);
        s.start_replay(false).unwrap();
        let mut buf = [0u8; 3];
        let mut seen = Vec::new();
        while s.read_line(&mut buf).unwrap() {
            seen.push(buf[0]);
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn reversed_replay_starts_at_the_end() {
        let mut s = filled(3);
        s.start_replay(true).unwrap();
        let mut buf = [0u8; 3];
        let mut seen = Vec::new();
        while s.read_line(&mut buf).unwrap() {
            seen.push(buf[0]);
        }
        assert_eq!(seen, vec![2, 1, 0]);
    }

    #[test]
    fn replay_can_restart() {
        let mut s = filled(2);
        let mut buf = [0u8; 3];
        s.start_replay(false).unwrap();
        while s.read_line(&mut buf).unwrap() {}
        s.start_replay(false).unwrap();
        assert!(s.read_line(&mut buf).unwrap());
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn created_in_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = RearSpool::create(Some(dir.path()), 2).unwrap();
        s.write_line(&[1, 2]).unwrap();
        assert!(s.write_line(&[1]).is_err());
        assert_eq!(s.lines(), 1);
    }
}

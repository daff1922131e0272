// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Block transport: every command is one synchronous request on a SCSI-style
// bus. A check condition is resolved through a request-sense side channel.

use std::time::Duration;

use scanwerk_core::config::TransportConfig;
use scanwerk_core::{Result, ScanError};
use thiserror::Error;
use tracing::debug;

use crate::channel::{Transport, TransportKind};
use crate::command::{Command, CommandClass};
use crate::retry::{RetryConfig, with_retry};
use crate::sense::SenseData;

/// Failure reported by the bus primitive.
#[derive(Debug, Error)]
pub enum BusFault {
    /// The device wants a request sense.
    #[error("check condition")]
    CheckCondition,
    #[error("device busy")]
    Busy,
    #[error("timed out")]
    Timeout,
    #[error("bus error: {0}")]
    Io(String),
}

/// Contract of the OS-provided SCSI command primitive.
pub trait ScsiBus: Send {
    /// Execute one command block. The returned data may be shorter than
    /// `data_in_len` when the device ends the data phase early.
    fn execute(
        &mut self,
        cdb: &[u8],
        data_out: &[u8],
        data_in_len: usize,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, BusFault>;

    /// Sense block of the most recent check condition.
    fn request_sense(&mut self) -> std::result::Result<Vec<u8>, BusFault>;
}

/// `Transport` over a [`ScsiBus`].
pub struct BlockTransport<B> {
    bus: B,
    retry: RetryConfig,
    config: TransportConfig,
}

impl<B: ScsiBus> BlockTransport<B> {
    pub fn new(bus: B, config: &TransportConfig) -> Self {
        Self {
            bus,
            retry: RetryConfig::from(config),
            config: config.clone(),
        }
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    fn timeout_for(&self, cmd: &Command) -> Duration {
        match cmd.class() {
            CommandClass::Inquiry => self.config.inquiry_timeout(),
            CommandClass::Readiness => self.config.readiness_timeout(),
            CommandClass::Standard => self.config.standard_timeout(),
        }
    }

    fn attempt(&mut self, cmd: &Command, out: &[u8], in_len: usize) -> Result<Vec<u8>> {
        let cdb = cmd.encode();
        let timeout = self.timeout_for(cmd);
        match self.bus.execute(&cdb, out, in_len, timeout) {
            Ok(data) => Ok(data),
            Err(BusFault::CheckCondition) => {
                let raw = self
                    .bus
                    .request_sense()
                    .map_err(|e| ScanError::Io(format!("request sense failed: {e}")))?;
                SenseData::parse(&raw)?.into_result()?;
                Ok(Vec::new())
            }
            Err(BusFault::Busy) => Err(ScanError::DeviceBusy),
            Err(BusFault::Timeout) => Err(ScanError::Io(format!(
                "command {:#04x} timed out after {timeout:?}",
                cmd.opcode
            ))),
            Err(BusFault::Io(detail)) => Err(ScanError::Io(detail)),
        }
    }
}

impl<B: ScsiBus> Transport for BlockTransport<B> {
    fn send(&mut self, cmd: &Command, out: Option<&[u8]>, in_len: usize) -> Result<Vec<u8>> {
        debug!(
            opcode = cmd.opcode,
            data_type = cmd.data_type,
            out_len = out.map_or(0, <[u8]>::len),
            in_len,
            "block command"
        );
        let out = out.unwrap_or(&[]);
        let retry = self.retry.clone();
        with_retry(&retry, |_| self.attempt(cmd, out, in_len))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Block
    }

    fn max_transfer(&self) -> usize {
        self.config.max_transfer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::opcode;
    use crate::sense::key;
    use scanwerk_core::ErrorKind;
    use std::collections::VecDeque;

    struct ScriptedBus {
        replies: VecDeque<std::result::Result<Vec<u8>, BusFault>>,
        sense: SenseData,
        executed: Vec<Vec<u8>>,
    }

    impl ScriptedBus {
        fn new(replies: Vec<std::result::Result<Vec<u8>, BusFault>>) -> Self {
            Self {
                replies: replies.into(),
                sense: SenseData::new(key::NO_SENSE, 0, 0),
                executed: Vec::new(),
            }
        }
    }

    impl ScsiBus for ScriptedBus {
        fn execute(
            &mut self,
            cdb: &[u8],
            _data_out: &[u8],
            _data_in_len: usize,
            _timeout: Duration,
        ) -> std::result::Result<Vec<u8>, BusFault> {
            self.executed.push(cdb.to_vec());
            self.replies.pop_front().unwrap_or(Ok(Vec::new()))
        }

        fn request_sense(&mut self) -> std::result::Result<Vec<u8>, BusFault> {
            Ok(self.sense.encode().to_vec())
        }
    }

    fn config() -> TransportConfig {
        TransportConfig {
            busy_delay_ms: 0,
            ..TransportConfig::default()
        }
    }

    #[test]
    fn good_command_returns_payload() {
        let bus = ScriptedBus::new(vec![Ok(vec![1, 2, 3])]);
        let mut t = BlockTransport::new(bus, &config());
        let data = t.read(&Command::new(opcode::INQUIRY), 3).unwrap();
        assert_eq!(data, vec![1, 2, 3]);
        assert_eq!(t.into_inner().executed[0].len(), 6);
    }

    #[test]
    fn check_condition_is_decoded_from_sense() {
        let mut bus = ScriptedBus::new(vec![Err(BusFault::CheckCondition)]);
        bus.sense = SenseData::new(key::MEDIUM_ERROR, 0x80, 0x01);
        let mut t = BlockTransport::new(bus, &config());
        let err = t.command(&Command::new(opcode::SCAN)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MediaJam);
        // Jams are never retried.
        assert_eq!(t.into_inner().executed.len(), 1);
    }

    #[test]
    fn busy_is_retried_until_success() {
        let bus = ScriptedBus::new(vec![Err(BusFault::Busy), Err(BusFault::Busy), Ok(vec![9])]);
        let mut t = BlockTransport::new(bus, &config());
        assert_eq!(t.read(&Command::new(opcode::MEDIA_CHECK), 1).unwrap(), vec![9]);
        assert_eq!(t.into_inner().executed.len(), 3);
    }

    #[test]
    fn timeouts_exhaust_after_four_attempts() {
        let bus = ScriptedBus::new((0..6).map(|_| Err(BusFault::Timeout)).collect());
        let mut t = BlockTransport::new(bus, &config());
        let err = t.command(&Command::new(opcode::TEST_UNIT_READY)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert_eq!(t.into_inner().executed.len(), 4);
    }

    #[test]
    fn readiness_and_inquiry_use_short_timeouts() {
        let t = BlockTransport::new(ScriptedBus::new(vec![]), &config());
        assert_eq!(
            t.timeout_for(&Command::new(opcode::INQUIRY)),
            Duration::from_secs(1)
        );
        assert_eq!(
            t.timeout_for(&Command::new(opcode::TEST_UNIT_READY)),
            Duration::from_secs(15)
        );
        assert_eq!(t.timeout_for(&Command::new(opcode::READ)), Duration::from_secs(30));
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Handle to one virtual scanner: hands out transports and lets tests look
// inside the firmware.

use std::sync::{Arc, Mutex};

use scanwerk_core::config::TransportConfig;
use scanwerk_core::ErrorKind;
use scanwerk_transport::wire::{FrontendRegisters, WindowDescriptor};
use scanwerk_transport::{BlockTransport, Command, StreamTransport, Transport};
use tracing::info;

use crate::firmware::Firmware;
use crate::link::{SharedFirmware, SimScsiBus, SimUsbPipe, lock};
use crate::profile::SimProfile;

/// A virtual scanner. Clones share the same firmware.
#[derive(Clone)]
pub struct VirtualScanner {
    profile: SimProfile,
    fw: SharedFirmware,
}

impl VirtualScanner {
    pub fn new(profile: SimProfile) -> Self {
        info!(model = %profile.model, sheets = profile.sheets, "virtual scanner powered on");
        Self {
            fw: Arc::new(Mutex::new(Firmware::new(profile.clone()))),
            profile,
        }
    }

    pub fn profile(&self) -> &SimProfile {
        &self.profile
    }

    // -- Links --

    pub fn bus(&self) -> SimScsiBus {
        SimScsiBus::new(Arc::clone(&self.fw))
    }

    pub fn pipe(&self) -> SimUsbPipe {
        SimUsbPipe::new(Arc::clone(&self.fw))
    }

    /// Block transport over the virtual SCSI bus.
    pub fn block_transport(&self, config: &TransportConfig) -> Box<dyn Transport> {
        Box::new(BlockTransport::new(self.bus(), config))
    }

    /// Stream transport over the virtual USB pipe.
    pub fn stream_transport(&self, config: &TransportConfig) -> Box<dyn Transport> {
        Box::new(StreamTransport::new(self.pipe(), config))
    }

    // -- Feeder --

    pub fn load_sheets(&self, sheets: u32) {
        lock(&self.fw).sheets = sheets;
    }

    pub fn sheets_left(&self) -> u32 {
        lock(&self.fw).sheets
    }

    // -- Fault injection --

    /// Fail the next reads of `data_type` with `kind`, long enough to
    /// exhaust any retry policy.
    pub fn fail_next_reads_of(&self, data_type: u8, kind: ErrorKind) {
        lock(&self.fw).inject(data_type, kind);
    }

    /// Answer the next `polls` TEST UNIT READY commands with busy.
    pub fn set_busy_polls(&self, polls: u32) {
        lock(&self.fw).busy_polls = polls;
    }

    // -- Inspection --

    /// Payloads the host sent with `opcode` and `data_type`, oldest first.
    pub fn sent_with(&self, opcode: u8, data_type: u8) -> Vec<Vec<u8>> {
        lock(&self.fw)
            .sent
            .iter()
            .filter(|s| s.opcode == opcode && s.data_type == data_type)
            .map(|s| s.payload.clone())
            .collect()
    }

    /// Qualifiers of the payloads `sent_with` returns.
    pub fn sent_qualifiers(&self, opcode: u8, data_type: u8) -> Vec<u16> {
        lock(&self.fw)
            .sent
            .iter()
            .filter(|s| s.opcode == opcode && s.data_type == data_type)
            .map(|s| s.qualifier)
            .collect()
    }

    pub fn frontend(&self) -> FrontendRegisters {
        lock(&self.fw).frontend
    }

    pub fn window(&self) -> Option<WindowDescriptor> {
        lock(&self.fw).window
    }

    /// Every command the firmware has seen, oldest first.
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.fw).log.clone()
    }

    pub fn count(&self, opcode: u8) -> usize {
        lock(&self.fw).log.iter().filter(|c| c.opcode == opcode).count()
    }

    pub fn clear_log(&self) {
        let mut fw = lock(&self.fw);
        fw.log.clear();
        fw.sent.clear();
    }

    /// Whether the host holds the unit reserved.
    pub fn is_reserved(&self) -> bool {
        lock(&self.fw).reserved
    }
}

impl std::fmt::Debug for VirtualScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualScanner")
            .field("model", &self.profile.model)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_transport::command::{data_type, opcode};

    fn inquiry(t: &mut dyn Transport, len: usize) -> Vec<u8> {
        let cmd = Command::new(opcode::INQUIRY).with_transfer_len(len).unwrap();
        t.read(&cmd, len).unwrap()
    }

    #[test]
    fn both_transports_reach_the_same_firmware() {
        let sim = VirtualScanner::new(SimProfile::flatbed());
        let cfg = TransportConfig::default();
        let block = inquiry(&mut *sim.block_transport(&cfg), 0x60);
        let stream = inquiry(&mut *sim.stream_transport(&cfg), 0x60);
        assert_eq!(block, stream);
        assert_eq!(sim.count(opcode::INQUIRY), 2);
    }

    #[test]
    fn check_conditions_become_typed_errors_on_both_transports() {
        let sim = VirtualScanner::new(SimProfile::sheetfed_duplex());
        let cfg = TransportConfig::default();
        let read = Command::new(opcode::READ)
            .with_data_type(data_type::CALIB_DARK)
            .with_transfer_len(8)
            .unwrap();
        for mut t in [sim.block_transport(&cfg), sim.stream_transport(&cfg)] {
            sim.fail_next_reads_of(data_type::CALIB_DARK, ErrorKind::MediaJam);
            let err = t.read(&read, 8).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MediaJam);
        }
    }

    #[test]
    fn sheets_can_be_reloaded() {
        let sim = VirtualScanner::new(SimProfile::sheetfed_duplex());
        assert_eq!(sim.sheets_left(), 3);
        sim.load_sheets(7);
        assert_eq!(sim.clone().sheets_left(), 7);
    }
}

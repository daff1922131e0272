// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Virtual firmware: one command in, data or a fault out.
//
// The firmware is transport-neutral. The block bus and the stream pipe both
// decode the host's command block and hand it here, then map the outcome to
// their own status reporting.

use scanwerk_core::ErrorKind;
use scanwerk_transport::command::{Command, data_type, opcode, scan_flags};
use scanwerk_transport::sense::key;
use scanwerk_transport::wire::{
    CalibrationFormat, FrontendRegisters, WindowDescriptor, bitset1, bitset3, calib_ability,
};
use scanwerk_transport::SenseData;
use tracing::{debug, trace};

use crate::image::{Interlace, PassFormat, Side};
use crate::profile::SimProfile;

/// Reads an injected fault keeps failing for; outlasts any retry policy.
const INJECTED_FAULT_READS: u32 = 16;

/// Leading pixels of a trial line that see no light.
const DARK_MARGIN: usize = 16;

/// Why a command did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Fault {
    Busy,
    Io(String),
    /// Check condition; the host fetches this sense block next.
    Check(SenseData),
}

impl Fault {
    pub(crate) fn from_kind(kind: ErrorKind) -> Self {
        let check = |k, asc, ascq| Self::Check(SenseData::new(k, asc, ascq));
        match kind {
            ErrorKind::IoError => Self::Io("injected bus error".into()),
            ErrorKind::DeviceBusy => Self::Busy,
            ErrorKind::NoMedia => check(key::NOT_READY, 0x80, 0x03),
            ErrorKind::MediaJam => check(key::MEDIUM_ERROR, 0x80, 0x01),
            ErrorKind::CoverOpen => check(key::NOT_READY, 0x80, 0x02),
            ErrorKind::MediaEnd => paper_end(),
            ErrorKind::InvalidParameter => check(key::ILLEGAL_REQUEST, 0x24, 0x00),
            ErrorKind::Cancelled => check(key::ABORTED_COMMAND, 0x00, 0x00),
            ErrorKind::OutOfMemory | ErrorKind::Unsupported => {
                check(key::HARDWARE_ERROR, 0x44, 0x00)
            }
        }
    }
}

fn paper_end() -> Fault {
    let mut sense = SenseData::new(key::NO_SENSE, 0x80, 0x04);
    sense.end_of_scan = true;
    Fault::Check(sense)
}

fn illegal(asc: u8, ascq: u8) -> Fault {
    Fault::Check(SenseData::new(key::ILLEGAL_REQUEST, asc, ascq))
}

/// A payload the host sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sent {
    pub opcode: u8,
    pub data_type: u8,
    pub qualifier: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct InjectedFault {
    data_type: u8,
    kind: ErrorKind,
    remaining: u32,
}

/// Image data of the pass in progress.
#[derive(Debug, Default)]
struct Pass {
    data: Vec<u8>,
    pos: usize,
    /// The sheet ran out before the window did.
    paper_end: bool,
}

#[derive(Debug)]
pub(crate) struct Firmware {
    pub profile: SimProfile,
    pub sheets: u32,
    pub window: Option<WindowDescriptor>,
    pub frontend: FrontendRegisters,
    pub log: Vec<Command>,
    pub sent: Vec<Sent>,
    pub reserved: bool,
    pub busy_polls: u32,
    sense: SenseData,
    pass: Pass,
    /// The next SCAN reads the turned-over sheet.
    flip_pending: bool,
    faults: Vec<InjectedFault>,
}

impl Firmware {
    pub(crate) fn new(profile: SimProfile) -> Self {
        Self {
            sheets: profile.sheets,
            profile,
            window: None,
            frontend: FrontendRegisters::default(),
            log: Vec::new(),
            sent: Vec::new(),
            reserved: false,
            busy_polls: 0,
            sense: SenseData::new(key::NO_SENSE, 0, 0),
            pass: Pass::default(),
            flip_pending: false,
            faults: Vec::new(),
        }
    }

    pub(crate) fn inject(&mut self, data_type: u8, kind: ErrorKind) {
        self.faults.push(InjectedFault {
            data_type,
            kind,
            remaining: INJECTED_FAULT_READS,
        });
    }

    /// Sense block of the last check condition, cleared once fetched.
    pub(crate) fn take_sense(&mut self) -> SenseData {
        std::mem::replace(&mut self.sense, SenseData::new(key::NO_SENSE, 0, 0))
    }

    /// A stream link cannot report a short transfer. When the last image
    /// read of a short sheet came back short, latch the paper end now so the
    /// link can signal it in the status phase.
    pub(crate) fn end_short_image_read(&mut self) -> bool {
        if !self.pass.paper_end || self.pass.pos < self.pass.data.len() {
            return false;
        }
        self.pass.paper_end = false;
        if let Fault::Check(sense) = paper_end() {
            self.sense = sense;
        }
        true
    }

    /// Run one command. Check conditions also latch their sense block.
    pub(crate) fn execute(
        &mut self,
        cmd: &Command,
        out: &[u8],
        in_len: usize,
    ) -> Result<Vec<u8>, Fault> {
        trace!(opcode = cmd.opcode, data_type = cmd.data_type, in_len, "sim command");
        self.log.push(*cmd);
        let result = self.dispatch(cmd, out, in_len);
        if let Err(Fault::Check(sense)) = &result {
            debug!(asc = sense.asc, ascq = sense.ascq, "sim check condition");
            self.sense = *sense;
        }
        result.map(|mut data| {
            data.truncate(in_len);
            data
        })
    }

    fn dispatch(&mut self, cmd: &Command, out: &[u8], in_len: usize) -> Result<Vec<u8>, Fault> {
        match cmd.opcode {
            opcode::TEST_UNIT_READY => {
                if self.busy_polls > 0 {
                    self.busy_polls -= 1;
                    return Err(Fault::Busy);
                }
                self.flip_pending = false;
                Ok(Vec::new())
            }
            opcode::INQUIRY => Ok(self.profile.inquiry()),
            opcode::REQUEST_SENSE => Ok(self.take_sense().encode().to_vec()),
            opcode::MEDIA_CHECK => Ok(vec![u8::from(self.sheets > 0)]),
            opcode::RESERVE_UNIT => {
                self.reserved = true;
                Ok(Vec::new())
            }
            opcode::RELEASE_UNIT => {
                self.reserved = false;
                Ok(Vec::new())
            }
            opcode::OBJECT_POSITION => Ok(Vec::new()),
            opcode::SET_WINDOW => {
                let window = WindowDescriptor::decode(out).map_err(|_| illegal(0x1a, 0x00))?;
                self.record(cmd, out);
                self.window = Some(window);
                Ok(Vec::new())
            }
            opcode::SCAN => {
                if cmd.qualifier as u8 & scan_flags::TRIAL != 0 {
                    Ok(Vec::new())
                } else {
                    self.start_pass()
                }
            }
            opcode::SEND => {
                self.record(cmd, out);
                if cmd.data_type == data_type::FRONTEND {
                    self.frontend = FrontendRegisters::decode(out).ok_or_else(|| illegal(0x26, 0x02))?;
                }
                Ok(Vec::new())
            }
            opcode::READ => self.read(cmd.data_type, in_len),
            _ => Err(illegal(0x20, 0x00)),
        }
    }

    fn record(&mut self, cmd: &Command, payload: &[u8]) {
        self.sent.push(Sent {
            opcode: cmd.opcode,
            data_type: cmd.data_type,
            qualifier: cmd.qualifier,
            payload: payload.to_vec(),
        });
    }

    fn read(&mut self, dt: u8, in_len: usize) -> Result<Vec<u8>, Fault> {
        if let Some(fault) = self.faults.iter_mut().find(|f| f.data_type == dt && f.remaining > 0) {
            fault.remaining -= 1;
            return Err(Fault::from_kind(fault.kind));
        }
        match dt {
            data_type::IMAGE => self.read_image(in_len),
            data_type::CALIB_FORMAT => Ok(self.calibration_format().encode().to_vec()),
            data_type::CALIB_DARK => Ok(reference(in_len, 6, 5)),
            data_type::CALIB_GRAY | data_type::CALIB_COLOR => Ok(reference(in_len, 200, 40)),
            data_type::TRIAL_LINE => Ok(self.trial_line(in_len)),
            _ => Err(illegal(0x24, 0x00)),
        }
    }

    fn calibration_format(&self) -> CalibrationFormat {
        let p = &self.profile;
        let mut ability = 0;
        if p.calib_multi_command {
            ability |= calib_ability::MULTI_COMMAND;
        }
        if p.calib_merge_dark {
            ability |= calib_ability::MERGE_DARK;
        }
        if p.calib_dark {
            ability |= calib_ability::NEEDS_DARK;
        }
        CalibrationFormat {
            pixels_per_line: p.calib_pixels,
            bytes_per_channel: p.calib_bytes_per_channel,
            lines: p.calib_lines,
            flags: u8::from(p.needs_calibration),
            ability,
            gains: [0; 3],
            white_targets: [0xe000; 3],
            dark_targets: [0; 3],
        }
    }

    /// One trial line at the current front-end settings. Channel count and
    /// order follow from the requested length and the sensor type.
    fn trial_line(&self, in_len: usize) -> Vec<u8> {
        let pixels = usize::from(self.profile.calib_pixels).max(1);
        let channels = (in_len / pixels).clamp(1, 3);
        let planar = self.profile.quirks.cis_sensor;
        let mut line = vec![0u8; in_len];
        for p in 0..pixels {
            for c in 0..channels {
                let offset = i32::from(self.frontend.offset[c]);
                let dark = (offset - i32::from(self.profile.dark_bias)).clamp(0, 255);
                let level = if p < DARK_MARGIN {
                    dark
                } else {
                    (dark + 140 + i32::from(self.frontend.gain[c]) / 2).min(255)
                };
                let at = if planar { c * pixels + p } else { p * channels + c };
                if let Some(b) = line.get_mut(at) {
                    *b = level as u8;
                }
            }
        }
        line
    }

    fn start_pass(&mut self) -> Result<Vec<u8>, Fault> {
        let window = self.window.ok_or_else(|| illegal(0x2c, 0x02))?;
        let feeder = window.bitset1 & bitset1::ADF != 0;
        let rear_pass = self.flip_pending;
        if feeder && !rear_pass {
            if self.sheets == 0 {
                return Err(Fault::from_kind(ErrorKind::NoMedia));
            }
            self.sheets -= 1;
        }
        let flipping = window.bitset3 & bitset3::DUPLEX != 0
            && window.bitset3 & bitset3::INTERLACED_DUPLEX == 0;
        self.flip_pending = feeder && flipping && !rear_pass;

        let (data, paper_end) = self.build_pass(&window, rear_pass, feeder);
        debug!(bytes = data.len(), rear_pass, paper_end, "sim pass started");
        self.pass = Pass {
            data,
            pos: 0,
            paper_end,
        };
        Ok(Vec::new())
    }

    fn build_pass(&self, w: &WindowDescriptor, rear_pass: bool, feeder: bool) -> (Vec<u8>, bool) {
        let fmt = PassFormat::new(w, &self.profile);
        let count = i64::from(w.line_count);
        let side = |side: Side, n: i64, shift: i64| -> Vec<Vec<u8>> {
            (0..n).map(|k| fmt.raw_line(side, k - shift)).collect()
        };

        let mut lines = if w.bitset3 & bitset3::INTERLACED_DUPLEX != 0 {
            let per_side = count / 2;
            let shift = if self.profile.quirks.rear_offset {
                i64::from(w.yres) / 2
            } else {
                0
            };
            Interlace::for_pass(w, &self.profile, fmt.skew())
                .merge(side(Side::Front, per_side, 0), side(Side::Rear, per_side, shift))
        } else if w.bitset3 & bitset3::REAR != 0 {
            side(Side::Rear, count, 0)
        } else if rear_pass {
            // The turned sheet passes the sensor bottom edge first.
            let mut rear = side(Side::Rear, count, 0);
            rear.reverse();
            rear
        } else {
            side(Side::Front, count, 0)
        };

        let mut paper_end = false;
        if let Some(limit) = self.profile.paper_lines.filter(|_| feeder) {
            if (limit as usize) < lines.len() {
                lines.truncate(limit as usize);
                paper_end = true;
            }
        }
        let mut data = Vec::with_capacity(lines.len() * fmt.line_bytes());
        for line in lines {
            data.extend_from_slice(&line);
        }
        (data, paper_end)
    }

    /// Serve image bytes. The read that crosses the end of a short sheet
    /// returns what is left; the one after it reports the paper end.
    fn read_image(&mut self, in_len: usize) -> Result<Vec<u8>, Fault> {
        let pass = &mut self.pass;
        let left = pass.data.len() - pass.pos;
        if left == 0 && pass.paper_end {
            pass.paper_end = false;
            return Err(paper_end());
        }
        let n = left.min(in_len);
        let chunk = pass.data[pass.pos..pass.pos + n].to_vec();
        pass.pos += n;
        Ok(chunk)
    }
}

/// Calibration reference data: `base` plus a repeating ripple below `spread`.
fn reference(len: usize, base: u8, spread: u8) -> Vec<u8> {
    (0..len)
        .map(|i| base.wrapping_add((i * 7 % usize::from(spread.max(1))) as u8))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(op: u8) -> Command {
        Command::new(op)
    }

    fn gray_window(lines: u32, adf: bool) -> Vec<u8> {
        WindowDescriptor {
            xres: 300,
            yres: 300,
            image_comp: scanwerk_transport::wire::image_comp::GRAY,
            bits_per_channel: 8,
            bitset1: if adf { bitset1::ADF } else { 0 },
            line_width: 16,
            line_count: lines,
            extended: true,
            ..WindowDescriptor::default()
        }
        .encode()
    }

    #[test]
    fn inquiry_is_truncated_to_request() {
        let mut fw = Firmware::new(SimProfile::flatbed());
        let data = fw.execute(&cmd(opcode::INQUIRY), &[], 0x24).unwrap();
        assert_eq!(data.len(), 0x24);
        assert_eq!(data[0], 0x06);
    }

    #[test]
    fn scan_without_window_is_illegal() {
        let mut fw = Firmware::new(SimProfile::flatbed());
        let err = fw.execute(&cmd(opcode::SCAN), &[], 0).unwrap_err();
        assert!(matches!(err, Fault::Check(s) if s.sense_key == key::ILLEGAL_REQUEST));
        assert_eq!(fw.take_sense().asc, 0x2c);
    }

    #[test]
    fn feeder_scan_consumes_sheets_then_reports_empty() {
        let mut fw = Firmware::new(SimProfile {
            sheets: 1,
            ..SimProfile::sheetfed_duplex()
        });
        fw.execute(&cmd(opcode::SET_WINDOW), &gray_window(4, true), 0).unwrap();
        fw.execute(&cmd(opcode::SCAN), &[], 0).unwrap();
        assert_eq!(fw.sheets, 0);
        let media = fw.execute(&cmd(opcode::MEDIA_CHECK), &[], 1).unwrap();
        assert_eq!(media, vec![0]);
        let err = fw.execute(&cmd(opcode::SCAN), &[], 0).unwrap_err();
        assert_eq!(err, Fault::from_kind(ErrorKind::NoMedia));
    }

    #[test]
    fn short_sheet_ends_with_paper_end() {
        let mut fw = Firmware::new(SimProfile {
            paper_lines: Some(3),
            ..SimProfile::sheetfed_duplex()
        });
        fw.execute(&cmd(opcode::SET_WINDOW), &gray_window(10, true), 0).unwrap();
        fw.execute(&cmd(opcode::SCAN), &[], 0).unwrap();
        let read = Command::new(opcode::READ).with_data_type(data_type::IMAGE);
        assert_eq!(fw.execute(&read, &[], 64).unwrap().len(), 48);
        let err = fw.execute(&read, &[], 64).unwrap_err();
        assert!(matches!(err, Fault::Check(s) if s.asc == 0x80 && s.ascq == 0x04));
    }

    #[test]
    fn injected_faults_outlast_retries() {
        let mut fw = Firmware::new(SimProfile::flatbed());
        fw.inject(data_type::CALIB_DARK, ErrorKind::MediaJam);
        let read = Command::new(opcode::READ).with_data_type(data_type::CALIB_DARK);
        for _ in 0..INJECTED_FAULT_READS {
            assert!(fw.execute(&read, &[], 8).is_err());
        }
        assert_eq!(fw.execute(&read, &[], 8).unwrap().len(), 8);
    }

    #[test]
    fn trial_line_follows_offset_register() {
        let mut fw = Firmware::new(SimProfile::flatbed());
        let pixels = usize::from(fw.profile.calib_pixels);
        fw.frontend = FrontendRegisters {
            offset: [30, 30, 30],
            gain: [0; 3],
        };
        let line = fw.trial_line(pixels);
        assert_eq!(line[0], 10);
        assert_eq!(line[pixels - 1], 150);
    }
}

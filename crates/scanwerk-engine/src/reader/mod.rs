// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reader: the producer side of a scan.
//
// Pulls raw lines from the device (or from the rear-page spool), routes rear
// lines of interlaced duplex passes to the spool, and turns front lines into
// output rows: colour pack, mirror, sample depth, crop, rescale. Rows go to
// the output pipe one stripe at a time. A page that ends early is padded to
// the announced line count.

pub mod depth;
pub mod interlace;
pub mod mirror;
pub mod pack;
pub mod scale;
pub mod stripe;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use scanwerk_core::{ErrorKind, Result, ScanError, SourceMode};
use scanwerk_transport::Transport;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationData;
use crate::capabilities::{DeviceCapabilities, ScannerClass};
use crate::commands::{self, ObjectPosition, scan_flags};
use crate::pipe::PipeWriter;
use crate::spool::RearSpool;
use crate::window::ScanGeometry;
use depth::ShadingTables;
pub use interlace::Deinterlace;
use scale::Rescaler;
use stripe::StripeBuffer;

/// Where the lines of a page come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    Device,
    /// Rear page of a duplex sheet, already spooled.
    Spool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPlan {
    pub deinterlace: Deinterlace,
    pub source: PageSource,
    /// After the front page, scan the flipped sheet into the spool.
    pub flip_rear_pass: bool,
    /// Replay the spool last line first.
    pub reverse_replay: bool,
}

/// Device traits the reader acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderFeatures {
    pub mirror: bool,
    pub bgr_order: bool,
    pub line_pack: bool,
    pub no_start_scan: bool,
    pub film_go_home: bool,
    pub stripe_lines: u32,
    pub data_qualifier: u16,
}

/// Inputs that decide how a job is built besides geometry and device.
#[derive(Debug, Clone, Default)]
pub struct JobOptions<'a> {
    pub preview: bool,
    pub adf_flip: bool,
    pub rear_replay: bool,
    pub calibration: Option<&'a CalibrationData>,
    pub spool_dir: Option<PathBuf>,
}

/// Everything the reader task needs, copied out of the session.
#[derive(Debug, Clone)]
pub struct ReaderJob {
    pub geometry: ScanGeometry,
    pub plan: ReadPlan,
    pub features: ReaderFeatures,
    pub shading: Option<ShadingTables>,
    pub scan_flags: u8,
    /// Window resent before the rear pass of a flipping duplexer.
    pub flip_window: Option<Vec<u8>>,
    pub spool_dir: Option<PathBuf>,
}

/// Interlacing scheme of a device pass for `geometry`.
pub fn deinterlace_for(geometry: &ScanGeometry, caps: &DeviceCapabilities) -> Deinterlace {
    if !geometry.interlaced_duplex {
        return Deinterlace::None;
    }
    if caps.class == ScannerClass::Film || caps.quirks.second_line_interlaced {
        return Deinterlace::Line;
    }
    if caps.quirks.non_interlaced_duplex_300 && geometry.hw_xres <= 300 && geometry.hw_yres <= 300 {
        return Deinterlace::Half {
            total_lines: 2 * geometry.lines_per_side(),
        };
    }
    Deinterlace::Stripe {
        lines_per_stripe: caps.stripe_lines + 2 * geometry.line_difference,
    }
}

/// Whether `geometry` is a duplex scan on a sheet-turning feeder.
pub fn is_flipping_duplex(geometry: &ScanGeometry, caps: &DeviceCapabilities) -> bool {
    caps.quirks.adf_flipping_duplex
        && geometry.source == SourceMode::AdfDuplex
        && !geometry.interlaced_duplex
}

impl ReaderJob {
    pub fn build(geometry: &ScanGeometry, caps: &DeviceCapabilities, opts: JobOptions<'_>) -> Self {
        let flipping = is_flipping_duplex(geometry, caps);
        let plan = ReadPlan {
            deinterlace: deinterlace_for(geometry, caps),
            source: if opts.rear_replay {
                PageSource::Spool
            } else {
                PageSource::Device
            },
            flip_rear_pass: flipping && !opts.rear_replay,
            reverse_replay: flipping,
        };
        let features = ReaderFeatures {
            mirror: geometry.source.is_adf() && caps.features.adf_needs_mirror,
            bgr_order: caps.features.adf_bgr_order,
            line_pack: caps.features.needs_line_pack,
            no_start_scan: caps.quirks.no_start_scan,
            film_go_home: caps.new_protocol && caps.class == ScannerClass::Film,
            stripe_lines: caps.stripe_lines.max(1),
            data_qualifier: caps.data_qualifier,
        };
        let shading = match opts.calibration {
            Some(cal) if caps.quirks.software_shading && geometry.mode.depth() == 16 => {
                Some(ShadingTables {
                    dark: cal.dark_avg.clone(),
                    white: cal.white_shading.clone(),
                })
            }
            _ => None,
        };
        let flip_window = (plan.flip_rear_pass && opts.adf_flip)
            .then(|| geometry.window(caps, true).encode());
        Self {
            geometry: geometry.clone(),
            plan,
            features,
            shading,
            scan_flags: if opts.preview { scan_flags::PREVIEW } else { 0 },
            flip_window,
            spool_dir: opts.spool_dir,
        }
    }

    /// Padding byte for rows missing at the end of a page.
    pub fn pad_byte(&self) -> u8 {
        if self.geometry.mode.is_binary() { 0x00 } else { 0xff }
    }

    fn color_skew(&self) -> usize {
        if self.geometry.mode.is_color() {
            self.geometry.line_difference as usize
        } else {
            0
        }
    }

    /// Size of the unit `mirror_line` must keep intact.
    fn mirror_unit(&self) -> usize {
        let mode = self.geometry.mode;
        let sample = mode.bytes_per_sample();
        if mode.is_binary() {
            0
        } else if mode.is_color() && !self.features.bgr_order {
            3 * sample
        } else {
            sample
        }
    }
}

// -- Per-side line pipeline --

/// Turns the raw lines of one side into output rows.
struct SidePipeline<'j> {
    job: &'j ReaderJob,
    stripe: StripeBuffer,
    packed: Vec<u8>,
    /// Packed lines to drop before the page starts.
    skip: u32,
    hw_line: u32,
    scaler: Option<Rescaler>,
    rows: u32,
    chunk: Vec<u8>,
}

impl<'j> SidePipeline<'j> {
    fn new(job: &'j ReaderJob, skip: u32) -> Self {
        let g = &job.geometry;
        let bpl = g.hw_bytes_per_line as usize;
        let skew = job.color_skew();
        let scaler = g.needs_rescale().then(|| {
            Rescaler::new(
                g.mode,
                g.hw_pixels_per_line,
                g.hw_lines,
                g.pixels_per_line,
                g.lines,
                g.bytes_per_line,
            )
        });
        Self {
            job,
            stripe: StripeBuffer::new(bpl, job.features.stripe_lines as usize + 2 * skew),
            packed: vec![0u8; bpl],
            skip,
            hw_line: 0,
            scaler,
            rows: 0,
            chunk: Vec::new(),
        }
    }

    fn push_raw(&mut self, raw: &[u8], out: &mut PipeWriter) -> Result<()> {
        self.stripe.push_line(raw)?;
        if self.stripe.is_full() {
            self.drain(out)?;
        }
        Ok(())
    }

    /// Process every buffered line whose colour look-ahead is present.
    fn drain(&mut self, out: &mut PipeWriter) -> Result<()> {
        let ready = self.stripe.len().saturating_sub(2 * self.job.color_skew());
        for i in 0..ready {
            self.pack(i)?;
            self.process_packed()?;
        }
        self.stripe.consume(ready);
        self.flush(out)
    }

    fn pack(&mut self, index: usize) -> Result<()> {
        let g = &self.job.geometry;
        let bpl = g.hw_bytes_per_line as usize;
        let sample = g.mode.bytes_per_sample();
        let skew = self.job.color_skew();
        if skew > 0 {
            pack::color_pack(self.stripe.as_slice(), index, bpl, skew, sample, &mut self.packed)
        } else {
            let line = self
                .stripe
                .line(index)
                .ok_or_else(|| ScanError::Io(format!("stripe line {index} missing")))?;
            if g.mode.is_color() && self.job.features.line_pack {
                pack::line_pack(line, g.hw_pixels_per_line as usize, sample, &mut self.packed)
            } else {
                self.packed.copy_from_slice(line);
                Ok(())
            }
        }
    }

    fn process_packed(&mut self) -> Result<()> {
        let h = self.hw_line;
        self.hw_line += 1;
        let g = &self.job.geometry;
        if h < self.skip || h >= self.skip + g.hw_lines {
            return Ok(());
        }
        if self.job.features.mirror {
            mirror::mirror_line(&mut self.packed, self.job.mirror_unit());
        }
        if g.mode.depth() == 16 {
            depth::widen_line(
                &mut self.packed,
                g.mode.is_twelve_bit(),
                self.job.shading.as_ref(),
            );
        }
        match self.scaler.as_mut() {
            Some(scaler) => {
                let chunk = &mut self.chunk;
                let rows = &mut self.rows;
                scaler.push(&self.packed, &mut |row: &[u8]| -> Result<()> {
                    chunk.extend_from_slice(row);
                    *rows += 1;
                    Ok(())
                })
            }
            None => {
                if self.rows < g.lines {
                    self.chunk.extend_from_slice(&self.packed);
                    self.rows += 1;
                }
                Ok(())
            }
        }
    }

    fn flush(&mut self, out: &mut PipeWriter) -> Result<()> {
        if self.chunk.is_empty() {
            return Ok(());
        }
        out.write(std::mem::take(&mut self.chunk))
    }

    /// End of data: process what can be, discard the unpackable tail, pad.
    fn finish(&mut self, out: &mut PipeWriter) -> Result<u32> {
        self.drain(out)?;
        self.stripe.consume(self.stripe.len());
        if let Some(scaler) = self.scaler.as_mut() {
            let chunk = &mut self.chunk;
            let rows = &mut self.rows;
            scaler.finish(&mut |row: &[u8]| -> Result<()> {
                chunk.extend_from_slice(row);
                *rows += 1;
                Ok(())
            })?;
        }
        self.flush(out)?;

        let g = &self.job.geometry;
        let delivered = self.rows;
        if self.rows < g.lines {
            debug!(delivered, lines = g.lines, "padding page");
            let row = vec![self.job.pad_byte(); g.bytes_per_line as usize];
            let per_chunk = self.job.features.stripe_lines.max(1);
            while self.rows < g.lines {
                let n = per_chunk.min(g.lines - self.rows);
                let mut chunk = Vec::with_capacity(row.len() * n as usize);
                for _ in 0..n {
                    chunk.extend_from_slice(&row);
                }
                out.write(chunk)?;
                self.rows += n;
            }
        }
        Ok(delivered)
    }
}

// -- Reader --

/// Where raw lines of a device pass go.
enum PassTarget<'p, 'j> {
    /// Front lines into the pipeline, rear lines (if any) into the spool.
    Page {
        front: &'p mut SidePipeline<'j>,
        rear: Option<&'p mut RearSpool>,
    },
    /// Every line into the spool.
    SpoolAll(&'p mut RearSpool),
}

pub struct Reader<'a> {
    job: &'a ReaderJob,
    cancel: &'a AtomicBool,
}

impl<'a> Reader<'a> {
    pub fn new(job: &'a ReaderJob, cancel: &'a AtomicBool) -> Self {
        Self { job, cancel }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Acquire) {
            return Err(ScanError::Cancelled);
        }
        Ok(())
    }

    /// Produce one page into `out`.
    pub fn run(
        &self,
        t: &mut dyn Transport,
        spool: &mut Option<RearSpool>,
        out: &mut PipeWriter,
    ) -> Result<()> {
        match self.job.plan.source {
            PageSource::Spool => self.replay(spool, out),
            PageSource::Device => {
                let interlaced = self.job.plan.deinterlace.is_interlaced();
                *spool = None;
                let mut rear = if interlaced {
                    Some(RearSpool::create(
                        self.job.spool_dir.as_deref(),
                        self.job.geometry.hw_bytes_per_line as usize,
                    )?)
                } else {
                    None
                };
                let mut front = SidePipeline::new(self.job, 0);
                self.device_session(t, |reader, t| {
                    reader.device_pass(
                        t,
                        PassTarget::Page {
                            front: &mut front,
                            rear: rear.as_mut(),
                        },
                        out,
                    )
                })?;
                let delivered = front.finish(out)?;
                info!(
                    rows = delivered,
                    lines = self.job.geometry.lines,
                    interlaced,
                    "front page read"
                );
                *spool = rear;

                if self.job.plan.flip_rear_pass {
                    *spool = Some(self.flip_pass(t, out)?);
                }
                Ok(())
            }
        }
    }

    /// Reserve, start, run `body`, then always release.
    fn device_session<F>(&self, t: &mut dyn Transport, body: F) -> Result<()>
    where
        F: FnOnce(&Self, &mut dyn Transport) -> Result<()>,
    {
        commands::reserve_unit(t)?;
        let result = if self.job.features.no_start_scan {
            debug!("start scan skipped for this device");
            body(self, t)
        } else {
            match commands::start_scan(t, self.job.scan_flags) {
                Ok(()) => body(self, t),
                Err(err) => Err(err),
            }
        };
        if let Err(err) = commands::release_unit(t) {
            warn!(error = %err, "release unit failed");
        }
        if self.job.features.film_go_home {
            if let Err(err) = commands::object_position(t, ObjectPosition::GoHome) {
                warn!(error = %err, "film holder go-home failed");
            }
        }
        result
    }

    /// Second pass of a flipping duplexer: the whole rear side into the spool.
    fn flip_pass(&self, t: &mut dyn Transport, out: &mut PipeWriter) -> Result<RearSpool> {
        self.check_cancel()?;
        if let Some(window) = &self.job.flip_window {
            commands::set_window(t, window)?;
        }
        let mut spool = RearSpool::create(
            self.job.spool_dir.as_deref(),
            self.job.geometry.hw_bytes_per_line as usize,
        )?;
        self.device_session(t, |reader, t| {
            reader.device_pass(t, PassTarget::SpoolAll(&mut spool), out)
        })?;
        info!(lines = spool.lines(), "flipped rear side spooled");
        Ok(spool)
    }

    /// Read one device pass, dispatching whole lines to `target`.
    fn device_pass(
        &self,
        t: &mut dyn Transport,
        mut target: PassTarget<'_, '_>,
        out: &mut PipeWriter,
    ) -> Result<()> {
        let g = &self.job.geometry;
        let bpl = g.hw_bytes_per_line as usize;
        let scheme = self.job.plan.deinterlace;
        let mut total = u64::from(g.lines_per_side());
        if scheme.is_interlaced() {
            total *= 2;
        }
        let per_read = (t.max_transfer() / bpl)
            .clamp(1, self.job.features.stripe_lines.max(1) as usize) as u64;

        let mut abs: u64 = 0;
        let mut carry: Vec<u8> = Vec::with_capacity(bpl * per_read as usize);
        while abs < total {
            self.check_cancel()?;
            let lines = per_read.min(total - abs);
            let want = lines as usize * bpl - carry.len();
            let data = match commands::read_image(t, self.job.features.data_qualifier, want) {
                Ok(data) => data,
                Err(err) if err.kind() == ErrorKind::MediaEnd => {
                    debug!(line = abs, "media end");
                    break;
                }
                Err(err) => return Err(err),
            };
            let short = data.len() < want;
            carry.extend_from_slice(&data);

            let whole = carry.len() / bpl;
            for line in carry.chunks_exact(bpl).take(whole) {
                match &mut target {
                    PassTarget::SpoolAll(spool) => spool.write_line(line)?,
                    PassTarget::Page { front, rear } => {
                        if scheme.is_rear_line(abs) {
                            if let Some(spool) = rear {
                                spool.write_line(line)?;
                            }
                        } else {
                            front.push_raw(line, out)?;
                        }
                    }
                }
                abs += 1;
            }
            carry.drain(..whole * bpl);

            if short {
                debug!(line = abs, total, "device ended data early");
                break;
            }
        }
        Ok(())
    }

    /// Rear page from the spool; the device is not touched.
    fn replay(&self, spool: &mut Option<RearSpool>, out: &mut PipeWriter) -> Result<()> {
        let spool = spool
            .as_mut()
            .ok_or_else(|| ScanError::Io("no rear page spooled".into()))?;
        spool.start_replay(self.job.plan.reverse_replay)?;
        let g = &self.job.geometry;
        let skip = if self.job.plan.deinterlace.is_interlaced() {
            g.rear_offset
        } else {
            0
        };
        let mut rear = SidePipeline::new(self.job, skip);
        let mut line = vec![0u8; spool.line_len()];
        let check_every = u64::from(self.job.features.stripe_lines.max(1));
        let mut n: u64 = 0;
        while spool.read_line(&mut line)? {
            if n % check_every == 0 {
                self.check_cancel()?;
            }
            rear.push_raw(&line, out)?;
            n += 1;
        }
        let delivered = rear.finish(out)?;
        info!(rows = delivered, lines = g.lines, "rear page replayed");
        Ok(())
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk demo
//
// Entry point. Initialises logging, attaches a simulated scanner, runs the
// scan job and writes each page as a PNG.
//
//     scanwerk [JOB.json] [--config ENGINE.json]

mod job;
mod raster;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use scanwerk_core::human_errors::humanize_error;
use scanwerk_core::{EngineConfig, ErrorKind, Result};
use scanwerk_engine::{DeviceRegistry, ScannerHandle};
use scanwerk_sim::VirtualScanner;

use job::ScanJob;

const DEVICE: &str = "sim:0";

#[derive(Debug, PartialEq, Parser)]
#[command(name = "scanwerk")]
#[command(about = "Scan pages from a simulated scanner into PNG files", version)]
struct Args {
    /// Scan job description (JSON). Defaults to one flatbed colour page.
    job: Option<PathBuf>,

    /// Engine configuration (JSON).
    #[arg(long, value_name = "ENGINE.json")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Scanwerk starting");

    match run() {
        Ok(pages) => {
            tracing::info!(pages, "scan job finished");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, kind = %err.kind(), "scan job failed");
            let human = humanize_error(&err);
            eprintln!("{}\n{}", human.message, human.suggestion);
            ExitCode::FAILURE
        }
    }
}

/// Run the job; returns the number of pages written.
fn run() -> Result<u32> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let job = match &args.job {
        Some(path) => ScanJob::load(path)?,
        None => ScanJob::default(),
    };

    let sim = VirtualScanner::new(job.device_profile()?);
    let mut registry = DeviceRegistry::new();
    let mut link = job.connect(&sim, &config.transport);
    registry.attach(DEVICE, &mut *link, &sim.profile().quirks, &config)?;

    let transport = job.connect(&sim, &config.transport);
    let mut handle = ScannerHandle::open(&registry, DEVICE, transport, config)?;
    handle.set_request(job.request)?;
    scan_pages(&mut handle, &job)
}

fn scan_pages(handle: &mut ScannerHandle, job: &ScanJob) -> Result<u32> {
    let feeder = job.request.source.is_adf();
    let mut written = 0;
    while written < job.max_pages {
        match handle.start() {
            Ok(()) => {}
            Err(err) if feeder && written > 0 && err.kind() == ErrorKind::NoMedia => {
                tracing::info!("feeder empty");
                break;
            }
            Err(err) => return Err(err),
        }
        let params = handle.parameters()?;
        let page = handle.read_page()?;
        written += 1;
        let path = job.page_path(written);
        raster::write_png(&params, &page, &path)?;
        tracing::info!(page = written, path = %path.display(), bytes = page.len(), "page written");
        if !feeder {
            break;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::{ColorMode, MM_PER_INCH, ScanArea, ScanRequest, SourceMode};

    fn args(list: &[&str]) -> std::result::Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("scanwerk").chain(list.iter().copied()))
    }

    #[test]
    fn args_take_a_job_and_a_config() {
        let a = args(&["job.json", "--config", "engine.json"]).unwrap();
        assert_eq!(a.job, Some(PathBuf::from("job.json")));
        assert_eq!(a.config, Some(PathBuf::from("engine.json")));
        assert_eq!(
            args(&[]).unwrap(),
            Args {
                job: None,
                config: None
            }
        );
        assert!(args(&["--config"]).is_err());
        assert!(args(&["--verbose"]).is_err());
        assert!(args(&["a.json", "b.json"]).is_err());
    }

    #[test]
    fn duplex_job_writes_every_side_until_the_feeder_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let side = 64.0 * MM_PER_INCH / 300.0;
        let job = ScanJob {
            preset: "sheetfed_duplex".into(),
            request: ScanRequest {
                mode: ColorMode::Gray,
                source: SourceMode::AdfDuplex,
                area: ScanArea::new(0.0, 0.0, side, side),
                ..ScanRequest::default()
            },
            output: dir.path().join("page"),
            ..ScanJob::default()
        };
        let config = EngineConfig::default();
        let sim = VirtualScanner::new(job.device_profile().unwrap());
        let mut registry = DeviceRegistry::new();
        let mut link = job.connect(&sim, &config.transport);
        registry
            .attach(DEVICE, &mut *link, &sim.profile().quirks, &config)
            .unwrap();
        let t = job.connect(&sim, &config.transport);
        let mut handle = ScannerHandle::open(&registry, DEVICE, t, config).unwrap();
        handle.set_request(job.request).unwrap();

        // Three sheets, two sides each.
        assert_eq!(scan_pages(&mut handle, &job).unwrap(), 6);
        let img = image::open(job.page_path(6)).unwrap().into_luma8();
        assert_eq!(img.dimensions(), (64, 64));
    }
}

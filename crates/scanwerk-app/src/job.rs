// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan job description, loaded from JSON.

use std::path::{Path, PathBuf};

use scanwerk_core::config::TransportConfig;
use scanwerk_core::{Result, ScanError, ScanRequest};
use scanwerk_sim::{SimProfile, VirtualScanner};
use scanwerk_transport::{Transport, TransportKind};
use serde::{Deserialize, Serialize};

/// What to scan, on which simulated device, and where the pages go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanJob {
    /// Built-in device: `flatbed`, `sheetfed_duplex` or `flipping_duplex`.
    pub preset: String,
    /// Full device description; replaces `preset` when given.
    pub profile: Option<SimProfile>,
    pub link: TransportKind,
    pub request: ScanRequest,
    /// Upper bound on pages taken from a feeder.
    pub max_pages: u32,
    /// Page files are written as `<output>-NNN.png`.
    pub output: PathBuf,
}

impl Default for ScanJob {
    fn default() -> Self {
        Self {
            preset: "flatbed".into(),
            profile: None,
            link: TransportKind::Block,
            request: ScanRequest::default(),
            max_pages: 10,
            output: PathBuf::from("scan"),
        }
    }
}

impl ScanJob {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn device_profile(&self) -> Result<SimProfile> {
        if let Some(profile) = &self.profile {
            return Ok(profile.clone());
        }
        match self.preset.as_str() {
            "flatbed" => Ok(SimProfile::flatbed()),
            "sheetfed_duplex" => Ok(SimProfile::sheetfed_duplex()),
            "flipping_duplex" => Ok(SimProfile::flipping_duplex()),
            other => Err(ScanError::InvalidParameter(format!(
                "unknown device preset {other:?}"
            ))),
        }
    }

    /// Open the job's transport kind to `sim`.
    pub fn connect(&self, sim: &VirtualScanner, config: &TransportConfig) -> Box<dyn Transport> {
        match self.link {
            TransportKind::Block => sim.block_transport(config),
            TransportKind::Stream => sim.stream_transport(config),
        }
    }

    /// File for page `n`, counting from one.
    pub fn page_path(&self, n: u32) -> PathBuf {
        let stem = self.output.to_string_lossy();
        PathBuf::from(format!("{stem}-{n:03}.png"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::{ColorMode, ErrorKind, SourceMode};

    #[test]
    fn partial_job_keeps_defaults() {
        let job = ScanJob::from_json_str(
            r#"{"preset":"sheetfed_duplex","request":{"mode":"Gray","source":"AdfDuplex"}}"#,
        )
        .unwrap();
        assert_eq!(job.request.mode, ColorMode::Gray);
        assert_eq!(job.request.source, SourceMode::AdfDuplex);
        assert_eq!(job.request.resolution, 300);
        assert_eq!(job.max_pages, 10);
        assert_eq!(job.link, TransportKind::Block);
        assert!(job.device_profile().unwrap().duplex);
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let job = ScanJob {
            preset: "drum".into(),
            ..ScanJob::default()
        };
        assert_eq!(job.device_profile().unwrap_err().kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn pages_are_numbered_from_one() {
        let job = ScanJob {
            output: PathBuf::from("out/letter"),
            ..ScanJob::default()
        };
        assert_eq!(job.page_path(1), PathBuf::from("out/letter-001.png"));
        assert_eq!(job.page_path(12), PathBuf::from("out/letter-012.png"));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = ScanJob::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }
}

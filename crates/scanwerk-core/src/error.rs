// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.
//
// Every failure a caller can observe maps onto exactly one `ErrorKind`. Wrapper
// variants (calibration, spool, config) keep their cause and report the kind
// of the underlying failure so nothing is flattened into a generic error.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanError {
    // -- Transport --
    #[error("I/O error: {0}")]
    Io(String),

    #[error("device busy")]
    DeviceBusy,

    // -- Request --
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    // -- Physical media --
    #[error("no document loaded")]
    NoMedia,

    #[error("document jammed")]
    MediaJam,

    #[error("cover open")]
    CoverOpen,

    #[error("end of media")]
    MediaEnd,

    // -- Session --
    #[error("operation cancelled")]
    Cancelled,

    #[error("out of memory")]
    OutOfMemory,

    // -- Wrappers --
    #[error("calibration step `{step}` failed: {source}")]
    Calibration {
        step: &'static str,
        #[source]
        source: Box<ScanError>,
    },

    #[error("spool file error: {0}")]
    Spool(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanError>;

/// The caller-visible failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    IoError,
    DeviceBusy,
    InvalidParameter,
    NoMedia,
    MediaJam,
    CoverOpen,
    MediaEnd,
    Cancelled,
    OutOfMemory,
    Unsupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IoError => "io-error",
            Self::DeviceBusy => "device-busy",
            Self::InvalidParameter => "invalid-parameter",
            Self::NoMedia => "no-media",
            Self::MediaJam => "media-jam",
            Self::CoverOpen => "cover-open",
            Self::MediaEnd => "media-end",
            Self::Cancelled => "cancelled",
            Self::OutOfMemory => "out-of-memory",
            Self::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

impl ScanError {
    /// Taxonomy kind of this error. Wrappers report the kind of their cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Spool(_) => ErrorKind::IoError,
            Self::DeviceBusy => ErrorKind::DeviceBusy,
            Self::InvalidParameter(_) | Self::Config(_) => ErrorKind::InvalidParameter,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::NoMedia => ErrorKind::NoMedia,
            Self::MediaJam => ErrorKind::MediaJam,
            Self::CoverOpen => ErrorKind::CoverOpen,
            Self::MediaEnd => ErrorKind::MediaEnd,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::OutOfMemory => ErrorKind::OutOfMemory,
            Self::Calibration { source, .. } => source.kind(),
        }
    }

    /// Wrap a failure raised while running a calibration step.
    pub fn calibration(step: &'static str, source: ScanError) -> Self {
        Self::Calibration {
            step,
            source: Box::new(source),
        }
    }

    /// Rebuild an error from its kind alone, as carried across the reader
    /// task boundary.
    pub fn from_kind(kind: ErrorKind, detail: impl Into<String>) -> Self {
        match kind {
            ErrorKind::IoError => Self::Io(detail.into()),
            ErrorKind::DeviceBusy => Self::DeviceBusy,
            ErrorKind::InvalidParameter => Self::InvalidParameter(detail.into()),
            ErrorKind::Unsupported => Self::Unsupported(detail.into()),
            ErrorKind::NoMedia => Self::NoMedia,
            ErrorKind::MediaJam => Self::MediaJam,
            ErrorKind::CoverOpen => Self::CoverOpen,
            ErrorKind::MediaEnd => Self::MediaEnd,
            ErrorKind::Cancelled => Self::Cancelled,
            ErrorKind::OutOfMemory => Self::OutOfMemory,
        }
    }

    /// True for the physical feeder states the caller has to resolve by hand.
    pub fn is_media_state(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NoMedia | ErrorKind::MediaJam | ErrorKind::CoverOpen | ErrorKind::MediaEnd
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_wrapper_reports_cause_kind() {
        let err = ScanError::calibration("offset", ScanError::DeviceBusy);
        assert_eq!(err.kind(), ErrorKind::DeviceBusy);
        assert!(err.to_string().contains("offset"));
    }

    #[test]
    fn nested_wrappers_still_resolve() {
        let inner = ScanError::calibration("gain", ScanError::MediaJam);
        let outer = ScanError::calibration("shading", inner);
        assert_eq!(outer.kind(), ErrorKind::MediaJam);
    }

    #[test]
    fn spool_errors_are_io() {
        let err: ScanError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), ErrorKind::IoError);
    }

    #[test]
    fn from_kind_round_trips_every_kind() {
        let kinds = [
            ErrorKind::IoError,
            ErrorKind::DeviceBusy,
            ErrorKind::InvalidParameter,
            ErrorKind::NoMedia,
            ErrorKind::MediaJam,
            ErrorKind::CoverOpen,
            ErrorKind::MediaEnd,
            ErrorKind::Cancelled,
            ErrorKind::OutOfMemory,
            ErrorKind::Unsupported,
        ];
        for kind in kinds {
            assert_eq!(ScanError::from_kind(kind, "x").kind(), kind);
        }
    }

    #[test]
    fn media_states_are_flagged() {
        assert!(ScanError::CoverOpen.is_media_state());
        assert!(!ScanError::Io("x".into()).is_media_state());
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages.
//
// Every technical error is mapped to plain English with a clear suggestion.
// Severity drives how a front-end presents it.

use crate::error::{ErrorKind, ScanError};

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Timeout or busy device; retrying may succeed.
    Transient,
    /// The user must do something (load paper, close the lid, clear a jam).
    ActionRequired,
    /// Retrying will not help.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary.
    pub message: String,
    /// What the user should try.
    pub suggestion: String,
    /// Whether retrying the same operation makes sense.
    pub retriable: bool,
    pub severity: Severity,
}

impl HumanError {
    fn new(message: &str, suggestion: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retriable: severity != Severity::Permanent,
            severity,
        }
    }
}

/// Convert a `ScanError` into a `HumanError`.
pub fn humanize_error(err: &ScanError) -> HumanError {
    if let ScanError::Calibration { step, source } = err {
        let mut inner = humanize_error(source);
        inner.message = format!("Calibration ({step}) failed: {}", inner.message);
        return inner;
    }

    match err.kind() {
        ErrorKind::IoError => HumanError::new(
            "The scanner stopped responding.",
            format!("Check the cable and power, then try again. ({err})"),
            Severity::Transient,
        ),
        ErrorKind::DeviceBusy => HumanError::new(
            "The scanner is busy.",
            "Wait a moment for it to finish warming up, then try again.",
            Severity::Transient,
        ),
        ErrorKind::InvalidParameter => HumanError::new(
            "That scan setting isn't possible.",
            format!("Choose a different resolution, area or mode. ({err})"),
            Severity::Permanent,
        ),
        ErrorKind::Unsupported => HumanError::new(
            "This scanner can't do that.",
            format!("Pick another option. ({err})"),
            Severity::Permanent,
        ),
        ErrorKind::NoMedia => HumanError::new(
            "There is no paper in the feeder.",
            "Put the pages face down in the document feeder and try again.",
            Severity::ActionRequired,
        ),
        ErrorKind::MediaJam => HumanError::new(
            "The paper is stuck.",
            "Open the feeder cover, gently remove the page, close the cover and try again.",
            Severity::ActionRequired,
        ),
        ErrorKind::CoverOpen => HumanError::new(
            "A cover is open.",
            "Close the scanner lid or feeder cover and try again.",
            Severity::ActionRequired,
        ),
        ErrorKind::MediaEnd => HumanError::new(
            "The page ended early.",
            "Check that the page went through the feeder straight.",
            Severity::ActionRequired,
        ),
        ErrorKind::Cancelled => HumanError::new(
            "The scan was cancelled.",
            "Start a new scan when you're ready.",
            Severity::Transient,
        ),
        ErrorKind::OutOfMemory => HumanError::new(
            "There isn't enough memory for this scan.",
            "Try a lower resolution or a smaller area.",
            Severity::Permanent,
        ),
    }
}

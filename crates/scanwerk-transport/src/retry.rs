// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded retry for device commands.
//
// Classifies errors into Transient (auto-retry), UserAction (feeder states the
// user must clear) and Permanent (give up). Only transient errors, i.e. I/O
// failures and busy devices, are retried, and never more than `max_attempts`
// times in total.

use std::time::Duration;

use scanwerk_core::config::TransportConfig;
use scanwerk_core::{ErrorClass, ErrorKind, Result, ScanError};
use tracing::{debug, warn};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Back-off after a busy device.
    pub busy_delay: Duration,
    /// Back-off after an I/O failure.
    pub io_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            busy_delay: Duration::from_millis(100),
            io_delay: Duration::ZERO,
        }
    }
}

impl From<&TransportConfig> for RetryConfig {
    fn from(cfg: &TransportConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            busy_delay: cfg.busy_delay(),
            io_delay: Duration::ZERO,
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry: the error is permanent or needs the user.
    GiveUp(ErrorClass),
    /// Attempt budget used up.
    Exhausted,
}

/// Classify a `ScanError` into an `ErrorClass` for retry decisions.
pub fn classify_error(err: &ScanError) -> ErrorClass {
    match err.kind() {
        ErrorKind::IoError | ErrorKind::DeviceBusy => ErrorClass::Transient,
        ErrorKind::NoMedia | ErrorKind::MediaJam | ErrorKind::CoverOpen | ErrorKind::MediaEnd => {
            ErrorClass::UserAction
        }
        ErrorKind::InvalidParameter
        | ErrorKind::Unsupported
        | ErrorKind::Cancelled
        | ErrorKind::OutOfMemory => ErrorClass::Permanent,
    }
}

/// Decide whether attempt number `attempt` (1-based) may be followed by another.
pub fn should_retry(err: &ScanError, attempt: u32, config: &RetryConfig) -> RetryDecision {
    match classify_error(err) {
        ErrorClass::Transient if attempt >= config.max_attempts => {
            warn!(attempt, max = config.max_attempts, error = %err, "retry limit exhausted");
            RetryDecision::Exhausted
        }
        ErrorClass::Transient => {
            let delay = if err.kind() == ErrorKind::DeviceBusy {
                config.busy_delay
            } else {
                config.io_delay
            };
            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying command");
            RetryDecision::RetryAfter(delay)
        }
        class => RetryDecision::GiveUp(class),
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget runs out.
///
/// `op` receives the 1-based attempt number. The last error is returned when
/// the budget is exhausted.
pub fn with_retry<T>(config: &RetryConfig, mut op: impl FnMut(u32) -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => match should_retry(&err, attempt, config) {
                RetryDecision::RetryAfter(delay) => {
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                RetryDecision::GiveUp(_) | RetryDecision::Exhausted => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> RetryConfig {
        RetryConfig {
            busy_delay: Duration::ZERO,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn io_and_busy_are_transient() {
        assert_eq!(classify_error(&ScanError::Io("x".into())), ErrorClass::Transient);
        assert_eq!(classify_error(&ScanError::DeviceBusy), ErrorClass::Transient);
    }

    #[test]
    fn feeder_states_need_the_user() {
        assert_eq!(classify_error(&ScanError::MediaJam), ErrorClass::UserAction);
        assert_eq!(classify_error(&ScanError::NoMedia), ErrorClass::UserAction);
    }

    #[test]
    fn invalid_parameter_never_retries() {
        let err = ScanError::InvalidParameter("window".into());
        assert_eq!(
            should_retry(&err, 1, &fast()),
            RetryDecision::GiveUp(ErrorClass::Permanent)
        );
    }

    #[test]
    fn retry_respects_max() {
        let err = ScanError::Io("short write".into());
        assert!(matches!(should_retry(&err, 3, &fast()), RetryDecision::RetryAfter(_)));
        assert_eq!(should_retry(&err, 4, &fast()), RetryDecision::Exhausted);
    }

    #[test]
    fn with_retry_stops_after_four_attempts() {
        let mut calls = 0;
        let result: Result<()> = with_retry(&fast(), |_| {
            calls += 1;
            Err(ScanError::Io("no reply".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 4);
    }

    #[test]
    fn with_retry_returns_first_success() {
        let value = with_retry(&fast(), |attempt| {
            if attempt < 3 {
                Err(ScanError::DeviceBusy)
            } else {
                Ok(attempt)
            }
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn with_retry_surfaces_media_state_immediately() {
        let mut calls = 0;
        let err = with_retry(&fast(), |_| -> Result<()> {
            calls += 1;
            Err(ScanError::CoverOpen)
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CoverOpen);
        assert_eq!(calls, 1);
    }
}

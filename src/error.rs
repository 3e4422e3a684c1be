//! Typed errors for every component, plus the single translator type the
//! event loop exposes to callers.

use thiserror::Error;

/// Errors from a [`crate::power_supply::PowerSupply`] implementation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PowerSupplyError {
    #[error("serial transport error: {0}")]
    Transport(String),
    #[error("response timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("device identity mismatch: expected pattern {expected:?}, got {actual:?}")]
    IdentityMismatch { expected: String, actual: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("requested setpoint out of limits")]
    OutOfLimits,
}

/// Errors from a [`crate::thermometer::ReferenceThermometer`] implementation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ThermometerError {
    #[error("frame checksum mismatch")]
    BadChecksum,
    #[error("unrecognized mode byte {0:#04x}")]
    UnknownMode(u8),
    #[error("frame has wrong length: expected 19, got {0}")]
    BadLength(usize),
    #[error("device not started")]
    NotStarted,
}

/// Errors from [`crate::rtd::RtdEstimator`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RtdError {
    #[error("temperature unavailable: current below minimum measurable threshold")]
    Unavailable,
    #[error("runaway: |dT|/dt = {rate:.2} exceeds limit {limit:.2}")]
    Runaway { rate: f64, limit: f64 },
}

/// Errors from controller construction or operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControllerError {
    #[error("feed-forward requires power-capable predictor")]
    FeedForwardRequiresPowerTable,
}

/// Errors from the calibration pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("calibration state {state} does not accept this transition")]
    InvalidTransition { state: &'static str },
    #[error("curve fit diverged for segment {segment}: {reason}")]
    Diverged { segment: String, reason: String },
    #[error("not enough samples to fit segment {segment} (have {have}, need {need})")]
    InsufficientSamples {
        segment: String,
        have: usize,
        need: usize,
    },
    #[error("calibration file error: {0}")]
    File(String),
}

/// The single translator the event loop exposes: every component error
/// surfaces here, per spec section 7 ("the EventLoop is the single
/// translator to user-visible failure").
#[derive(Debug, Error)]
pub enum EventLoopError {
    #[error(transparent)]
    PowerSupply(#[from] PowerSupplyError),
    #[error(transparent)]
    Thermometer(#[from] ThermometerError),
    #[error(transparent)]
    Rtd(#[from] RtdError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("runaway temperature change: {0}")]
    Runaway(String),
    #[error("device unreachable: {consecutive_failures} consecutive poll failures, last error: {last_error}")]
    DeviceUnreachable {
        consecutive_failures: u32,
        last_error: String,
    },
    #[error("signal received, shutting down")]
    Signal,
}

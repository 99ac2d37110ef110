//! Unified error types for the GridBalance firmware.
//!
//! Every boundary call into an external collaborator returns one of the
//! typed errors below.  The controller recovers all three I/O categories
//! locally; only configuration errors are fatal, and those surface at
//! start-up.  All variants are `Copy` so they can be counted and logged
//! without allocation.

use core::fmt;

use crate::app::ports::ConfigError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The grid meter could not be read.
    Sensor(SensorError),
    /// The inverter rejected or never received a setpoint.
    Dispatch(DispatchError),
    /// A telemetry report could not be delivered.
    Telemetry(TelemetryError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Dispatch(e) => write!(f, "dispatch: {e}"),
            Self::Telemetry(e) => write!(f, "telemetry: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// TCP connect to the meter failed.
    ConnectFailed,
    /// The meter did not answer within the I/O timeout.
    Timeout,
    /// Socket read or write failed after the connection was established.
    Io,
    /// The response frame did not decode (wrong ids, length or function).
    MalformedResponse,
    /// The meter answered with a Modbus exception code.
    Exception(u8),
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "meter connect failed"),
            Self::Timeout => write!(f, "meter read timed out"),
            Self::Io => write!(f, "meter I/O error"),
            Self::MalformedResponse => write!(f, "malformed meter response"),
            Self::Exception(code) => write!(f, "meter exception 0x{code:02x}"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Dispatch errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// TCP connect to the inverter failed.
    ConnectFailed,
    /// The inverter did not answer within the I/O timeout.
    Timeout,
    /// The request failed in transit after the connection was made.
    Io,
    /// The request body could not be encoded.
    Encode,
    /// The inverter answered with a non-2xx HTTP status.
    Rejected(u16),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "inverter connect failed"),
            Self::Timeout => write!(f, "inverter request timed out"),
            Self::Io => write!(f, "inverter I/O error"),
            Self::Encode => write!(f, "request encoding failed"),
            Self::Rejected(status) => write!(f, "inverter rejected setpoint (HTTP {status})"),
        }
    }
}

impl From<DispatchError> for Error {
    fn from(e: DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

// ---------------------------------------------------------------------------
// Telemetry errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryError {
    /// The sink is not reachable right now.
    Unavailable,
    /// The sink accepted the connection but the push failed.
    PublishFailed,
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "telemetry sink unavailable"),
            Self::PublishFailed => write!(f, "telemetry publish failed"),
        }
    }
}

impl From<TelemetryError> for Error {
    fn from(e: TelemetryError) -> Self {
        Self::Telemetry(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Socket error mapping
// ---------------------------------------------------------------------------

/// Whether an I/O error is a socket timeout.  Both kinds are reported
/// depending on platform (`WouldBlock` on lwIP and some Unixes).
pub(crate) fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

impl From<std::io::Error> for SensorError {
    fn from(e: std::io::Error) -> Self {
        if is_timeout(&e) { Self::Timeout } else { Self::Io }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

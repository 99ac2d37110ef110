//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ PowerController (domain)
//! ```
//!
//! Driven adapters (grid meter, inverter, telemetry sink, clock, config
//! storage) implement these traits.  The
//! [`PowerController`](super::service::PowerController) consumes them via
//! generics, so the control core never touches a socket directly.
//!
//! Every blocking call behind these traits MUST be bounded by a timeout;
//! an expired timeout is reported as the call's error, never as a stall.

use crate::config::SystemConfig;
use crate::control::{PowerReading, Setpoint};
use crate::error::{DispatchError, SensorError, TelemetryError};

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: grid meter → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: the domain calls this once per control cycle.
pub trait SensorPort {
    /// Read the current net grid power.
    fn read(&mut self) -> Result<PowerReading, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → battery inverter)
// ───────────────────────────────────────────────────────────────

/// Write-side port: fire-and-forget setpoint delivery.
pub trait ActuatorPort {
    /// Command the battery to charge (positive) or discharge (negative).
    fn dispatch(&mut self, setpoint: Setpoint) -> Result<(), DispatchError>;
}

// ───────────────────────────────────────────────────────────────
// Telemetry port (driven adapter: domain → logging / time-series)
// ───────────────────────────────────────────────────────────────

/// Best-effort reporting.  Failures are counted and otherwise ignored.
pub trait TelemetryPort {
    fn publish(&mut self, reading: PowerReading, setpoint: Setpoint)
    -> Result<(), TelemetryError>;
}

// ───────────────────────────────────────────────────────────────
// Time port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock driving the scheduler.
pub trait TimePort {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`SystemConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from task bodies)
// ───────────────────────────────────────────────────────────────

/// Callback trait that the scheduler invokes when a task is due.
///
/// The [`Scheduler`](crate::scheduler::Scheduler) only keeps time; the
/// delegate runs the task body synchronously and returns before the
/// scheduler evaluates the next task.
pub trait SchedulerDelegate {
    fn on_task_due(&mut self, task: TaskId, now_ms: u64);
}

/// The two periodic tasks multiplexed onto the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskId {
    /// Read meter → filter → dispatch.
    Control,
    /// Report the last reading and current setpoint.
    Telemetry,
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations and config validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}

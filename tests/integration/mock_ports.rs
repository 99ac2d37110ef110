//! Mock port adapters for integration tests.
//!
//! Every mock records what the controller asked of it so tests can assert
//! on the full call history without a meter or inverter on the network.

use std::cell::Cell;
use std::collections::VecDeque;

use gridbalance::app::ports::{ActuatorPort, SensorPort, TelemetryPort, TimePort};
use gridbalance::control::{PowerReading, Setpoint};
use gridbalance::error::{DispatchError, SensorError, TelemetryError};

// ── Meter ─────────────────────────────────────────────────────

/// Replays scripted readings, then repeats `fallback` forever.
pub struct ScriptedMeter {
    script: VecDeque<Result<PowerReading, SensorError>>,
    fallback: Result<PowerReading, SensorError>,
    pub reads: usize,
}

#[allow(dead_code)]
impl ScriptedMeter {
    /// A meter that always reports `watts`.
    pub fn steady(watts: i32) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Ok(PowerReading(watts)),
            reads: 0,
        }
    }

    /// A meter that always fails with `error`.
    pub fn failing(error: SensorError) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Err(error),
            reads: 0,
        }
    }

    pub fn then(mut self, result: Result<PowerReading, SensorError>) -> Self {
        self.script.push_back(result);
        self
    }

    pub fn set_fallback(&mut self, result: Result<PowerReading, SensorError>) {
        self.fallback = result;
    }
}

impl SensorPort for ScriptedMeter {
    fn read(&mut self) -> Result<PowerReading, SensorError> {
        self.reads += 1;
        self.script.pop_front().unwrap_or(self.fallback)
    }
}

// ── Inverter ──────────────────────────────────────────────────

/// Records every setpoint it is asked to apply, accepted or not.
#[derive(Default)]
pub struct RecordingInverter {
    pub sent: Vec<Setpoint>,
    pub reject_with: Option<DispatchError>,
}

#[allow(dead_code)]
impl RecordingInverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(error: DispatchError) -> Self {
        Self {
            sent: Vec::new(),
            reject_with: Some(error),
        }
    }

    pub fn last(&self) -> Option<Setpoint> {
        self.sent.last().copied()
    }
}

impl ActuatorPort for RecordingInverter {
    fn dispatch(&mut self, setpoint: Setpoint) -> Result<(), DispatchError> {
        self.sent.push(setpoint);
        match self.reject_with {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ── Telemetry ─────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingTelemetry {
    pub reports: Vec<(PowerReading, Setpoint)>,
    pub fail: bool,
}

#[allow(dead_code)]
impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            reports: Vec::new(),
            fail: true,
        }
    }
}

impl TelemetryPort for RecordingTelemetry {
    fn publish(&mut self, reading: PowerReading, setpoint: Setpoint) -> Result<(), TelemetryError> {
        self.reports.push((reading, setpoint));
        if self.fail {
            Err(TelemetryError::Unavailable)
        } else {
            Ok(())
        }
    }
}

// ── Clock ─────────────────────────────────────────────────────

/// Manually advanced millisecond clock.
#[derive(Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn at(ms: u64) -> Self {
        Self { now: Cell::new(ms) }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl TimePort for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

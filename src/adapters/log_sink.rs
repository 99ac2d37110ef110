//! Log-based telemetry sink adapter.
//!
//! Implements [`TelemetryPort`] by writing one structured line per report
//! to the ESP-IDF logger (UART / USB-CDC in production).  An MQTT or
//! HTTP time-series adapter would implement the same trait.

use log::info;

use crate::app::ports::TelemetryPort;
use crate::control::{PowerReading, Setpoint};
use crate::error::TelemetryError;

/// Battery direction implied by a setpoint.
pub fn battery_mode(setpoint: Setpoint) -> &'static str {
    match setpoint.watts() {
        0 => "idle",
        w if w > 0 => "charging",
        _ => "discharging",
    }
}

/// Adapter that logs every telemetry report to the serial console.
#[derive(Debug, Default)]
pub struct LogTelemetrySink {
    reports: u64,
}

impl LogTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports written so far.
    pub fn reports(&self) -> u64 {
        self.reports
    }
}

impl TelemetryPort for LogTelemetrySink {
    fn publish(&mut self, reading: PowerReading, setpoint: Setpoint) -> Result<(), TelemetryError> {
        self.reports += 1;
        info!(
            "TELEM | grid={} | setpoint={} | mode={} | n={}",
            reading,
            setpoint,
            battery_mode(setpoint),
            self.reports,
        );
        Ok(())
    }
}

//! Power controller: the hexagonal core.
//!
//! [`PowerController`] owns the control filter, the schedule state and the
//! one piece of control state carried across ticks: the current setpoint.
//! All I/O flows through port traits injected at call sites, making the
//! whole loop testable with mock adapters.
//!
//! ```text
//!  SensorPort ──▶ ┌─────────────────────────┐ ──▶ TelemetryPort
//!                 │     PowerController      │
//! ActuatorPort ◀──│  Scheduler · Filter      │ ◀── TimePort
//!                 └─────────────────────────┘
//! ```
//!
//! No boundary error ever escapes [`PowerController::tick`]: a failed meter
//! read, a failed dispatch and a failed telemetry push are all recovered
//! here so the loop keeps supervising the battery.

use log::{debug, info, warn};

use crate::config::{ControlConfig, SensorFailurePolicy};
use crate::control::{ControlFilter, PowerReading, Setpoint};
use crate::error::{DispatchError, SensorError};
use crate::scheduler::{FiredTasks, Scheduler};

use super::ports::{
    ActuatorPort, ConfigError, SchedulerDelegate, SensorPort, TaskId, TelemetryPort, TimePort,
};

// ───────────────────────────────────────────────────────────────
// Outcomes and statistics
// ───────────────────────────────────────────────────────────────

/// What the control task did on a tick where it fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// New setpoint computed and accepted by the inverter.
    Dispatched(Setpoint),
    /// New setpoint computed; delivery failed and is not retried.
    DispatchFailed(Setpoint, DispatchError),
    /// Meter unavailable; previous setpoint held, nothing dispatched.
    Held(SensorError),
    /// Meter unavailable; setpoint stepped toward zero and dispatched.
    /// Carries the delivery error when the inverter did not take it.
    RampedToZero(Setpoint, SensorError, Option<DispatchError>),
}

/// Result of one [`PowerController::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub fired: FiredTasks,
    pub control: Option<ControlOutcome>,
}

/// Running counters since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerStats {
    pub control_cycles: u64,
    pub dispatches: u64,
    pub sensor_failures: u64,
    pub dispatch_failures: u64,
    pub telemetry_reports: u64,
    pub telemetry_failures: u64,
    /// Telemetry firings with no successful reading yet to report.
    pub telemetry_skipped: u64,
}

#[derive(Debug, Default)]
struct ControlState {
    setpoint: Setpoint,
    last_known_reading: Option<PowerReading>,
    consecutive_sensor_failures: u32,
    consecutive_dispatch_failures: u32,
    stats: ControllerStats,
}

// ───────────────────────────────────────────────────────────────
// PowerController
// ───────────────────────────────────────────────────────────────

/// The controller orchestrates filter, scheduler and ports.
pub struct PowerController {
    filter: ControlFilter,
    scheduler: Scheduler,
    state: ControlState,
}

impl PowerController {
    /// Construct the controller for a loop starting at `start_ms`.
    ///
    /// Rejects an invalid configuration here rather than at runtime.
    pub fn new(config: ControlConfig, start_ms: u64) -> Result<Self, ConfigError> {
        let filter = ControlFilter::new(config)?;
        let scheduler = Scheduler::new(filter.config(), start_ms);
        info!(
            "PowerController: deadzone={}W charge<={}W discharge<={}W ramp={}W/cycle \
             control={}ms telemetry={}ms policy={:?}",
            filter.config().deadzone_w,
            filter.config().max_charge_w,
            filter.config().max_discharge_w,
            filter.config().ramp_w_per_cycle,
            filter.config().control_period_ms,
            filter.config().telemetry_period_ms,
            filter.config().sensor_failure_policy,
        );
        Ok(Self {
            filter,
            scheduler,
            state: ControlState::default(),
        })
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Read the clock and run one tick.
    pub fn poll(
        &mut self,
        clock: &impl TimePort,
        sensor: &mut impl SensorPort,
        actuator: &mut impl ActuatorPort,
        reporter: &mut impl TelemetryPort,
    ) -> TickReport {
        let now_ms = clock.now_ms();
        self.tick(now_ms, sensor, actuator, reporter)
    }

    /// Run whichever tasks are due at `now_ms`.  Never blocks beyond the
    /// ports' own timeouts and never fails.
    pub fn tick(
        &mut self,
        now_ms: u64,
        sensor: &mut impl SensorPort,
        actuator: &mut impl ActuatorPort,
        reporter: &mut impl TelemetryPort,
    ) -> TickReport {
        let mut runner = TaskRunner {
            filter: &self.filter,
            state: &mut self.state,
            sensor,
            actuator,
            reporter,
            outcome: None,
        };
        let fired = self.scheduler.tick(now_ms, &mut runner);
        TickReport {
            fired,
            control: runner.outcome,
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn setpoint(&self) -> Setpoint {
        self.state.setpoint
    }

    pub fn last_known_reading(&self) -> Option<PowerReading> {
        self.state.last_known_reading
    }

    pub fn stats(&self) -> ControllerStats {
        self.state.stats
    }

    pub fn config(&self) -> &ControlConfig {
        self.filter.config()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

// ───────────────────────────────────────────────────────────────
// Task bodies
// ───────────────────────────────────────────────────────────────

/// Borrows the controller's state and the ports for the duration of one
/// tick and runs the task bodies the scheduler asks for.
struct TaskRunner<'a, S, A, T> {
    filter: &'a ControlFilter,
    state: &'a mut ControlState,
    sensor: &'a mut S,
    actuator: &'a mut A,
    reporter: &'a mut T,
    outcome: Option<ControlOutcome>,
}

impl<S, A, T> TaskRunner<'_, S, A, T>
where
    S: SensorPort,
    A: ActuatorPort,
    T: TelemetryPort,
{
    fn run_control(&mut self) {
        self.state.stats.control_cycles += 1;

        let outcome = match self.sensor.read() {
            Ok(reading) => {
                if self.state.consecutive_sensor_failures > 0 {
                    info!(
                        "Meter recovered after {} failed reads",
                        self.state.consecutive_sensor_failures
                    );
                    self.state.consecutive_sensor_failures = 0;
                }
                self.state.last_known_reading = Some(reading);
                let next = self.filter.compute(reading, self.state.setpoint);
                debug!("grid={} setpoint {} -> {}", reading, self.state.setpoint, next);
                self.state.setpoint = next;
                match self.dispatch(next) {
                    Ok(()) => ControlOutcome::Dispatched(next),
                    Err(e) => ControlOutcome::DispatchFailed(next, e),
                }
            }
            Err(e) => {
                self.state.stats.sensor_failures += 1;
                self.state.consecutive_sensor_failures += 1;
                if self.state.consecutive_sensor_failures == 1 {
                    warn!("Meter read failed: {} (total {})", e, self.state.stats.sensor_failures);
                } else {
                    debug!(
                        "Meter read failed: {} ({} in a row)",
                        e, self.state.consecutive_sensor_failures
                    );
                }
                self.on_sensor_failure(e)
            }
        };

        self.outcome = Some(outcome);
    }

    fn on_sensor_failure(&mut self, error: SensorError) -> ControlOutcome {
        match self.filter.config().sensor_failure_policy {
            SensorFailurePolicy::HoldLast => ControlOutcome::Held(error),
            SensorFailurePolicy::RampToZero => {
                let next = self.filter.step_toward_zero(self.state.setpoint);
                self.state.setpoint = next;
                let delivery = self.dispatch(next).err();
                ControlOutcome::RampedToZero(next, error, delivery)
            }
        }
    }

    fn dispatch(&mut self, setpoint: Setpoint) -> Result<(), DispatchError> {
        match self.actuator.dispatch(setpoint) {
            Ok(()) => {
                self.state.stats.dispatches += 1;
                if self.state.consecutive_dispatch_failures > 0 {
                    info!(
                        "Inverter reachable again after {} failed dispatches",
                        self.state.consecutive_dispatch_failures
                    );
                    self.state.consecutive_dispatch_failures = 0;
                }
                Ok(())
            }
            Err(e) => {
                self.state.stats.dispatch_failures += 1;
                self.state.consecutive_dispatch_failures += 1;
                if self.state.consecutive_dispatch_failures == 1 {
                    warn!("Dispatch of {} failed: {}", setpoint, e);
                } else {
                    debug!(
                        "Dispatch of {} failed: {} ({} in a row)",
                        setpoint, e, self.state.consecutive_dispatch_failures
                    );
                }
                Err(e)
            }
        }
    }

    fn run_telemetry(&mut self) {
        let Some(reading) = self.state.last_known_reading else {
            self.state.stats.telemetry_skipped += 1;
            debug!("Telemetry: no meter reading yet, skipping report");
            return;
        };

        match self.reporter.publish(reading, self.state.setpoint) {
            Ok(()) => self.state.stats.telemetry_reports += 1,
            Err(e) => {
                self.state.stats.telemetry_failures += 1;
                warn!("Telemetry publish failed: {}", e);
            }
        }
    }
}

impl<S, A, T> SchedulerDelegate for TaskRunner<'_, S, A, T>
where
    S: SensorPort,
    A: ActuatorPort,
    T: TelemetryPort,
{
    fn on_task_due(&mut self, task: TaskId, _now_ms: u64) {
        match task {
            TaskId::Control => self.run_control(),
            TaskId::Telemetry => self.run_telemetry(),
        }
    }
}

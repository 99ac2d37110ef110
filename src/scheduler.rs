//! Multi-rate cooperative scheduler.
//!
//! Multiplexes the fast control task and the slow telemetry task onto the
//! single main-loop thread by time-gating.  The scheduler owns nothing but
//! timestamps; when a task is due it notifies a [`SchedulerDelegate`] and
//! the delegate runs the task to completion before the next one is
//! considered.
//!
//! ```text
//!            now_ms
//!              │
//!              ▼
//!  ┌──────────────────────┐   due?   ┌───────────────────────────┐
//!  │ control   (100 ms)   │ ───────▶ │                           │
//!  └──────────────────────┘          │    SchedulerDelegate      │
//!  ┌──────────────────────┐   due?   │  (PowerController tasks)  │
//!  │ telemetry (10 s)     │ ───────▶ │                           │
//!  └──────────────────────┘          └───────────────────────────┘
//! ```
//!
//! Per task the state machine is `Idle → Due → (fire) → Idle`.  After a
//! firing the last-fired timestamp becomes the tick time itself, not the
//! previous timestamp plus the period: a late tick fires once and never
//! triggers a catch-up burst.

use log::debug;

use crate::app::ports::{SchedulerDelegate, TaskId};
use crate::config::ControlConfig;

// ═══════════════════════════════════════════════════════════════
//  Periodic task
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for the period to elapse.
    Idle,
    /// Period elapsed; fires on this tick.
    Due,
}

/// Timing bookkeeping for one fixed-period task.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    label: &'static str,
    period_ms: u64,
    /// `None` until the first firing; a never-fired task is due at once.
    last_fired_ms: Option<u64>,
    fire_count: u64,
}

impl PeriodicTask {
    /// A task that is due on the very first tick.
    pub fn new(label: &'static str, period_ms: u64) -> Self {
        Self {
            label,
            period_ms,
            last_fired_ms: None,
            fire_count: 0,
        }
    }

    /// A task whose first firing comes one full period after `start_ms`.
    pub fn seeded(label: &'static str, period_ms: u64, start_ms: u64) -> Self {
        Self {
            last_fired_ms: Some(start_ms),
            ..Self::new(label, period_ms)
        }
    }

    pub fn state(&self, now_ms: u64) -> TaskState {
        match self.last_fired_ms {
            None => TaskState::Due,
            // Saturating: a clock that steps backwards reads as "no time elapsed".
            Some(last) if now_ms.saturating_sub(last) >= self.period_ms => TaskState::Due,
            Some(_) => TaskState::Idle,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.state(now_ms) == TaskState::Due
    }

    pub fn mark_fired(&mut self, now_ms: u64) {
        self.last_fired_ms = Some(now_ms);
        self.fire_count += 1;
    }

    /// Milliseconds until this task becomes due (0 when already due).
    pub fn millis_until_due(&self, now_ms: u64) -> u64 {
        match self.last_fired_ms {
            None => 0,
            Some(last) => self
                .period_ms
                .saturating_sub(now_ms.saturating_sub(last)),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn last_fired_ms(&self) -> Option<u64> {
        self.last_fired_ms
    }

    pub fn fire_count(&self) -> u64 {
        self.fire_count
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Which tasks fired during one [`Scheduler::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FiredTasks {
    pub control: bool,
    pub telemetry: bool,
}

/// The schedule state: last-fired timestamps of both tasks.
pub struct Scheduler {
    control: PeriodicTask,
    telemetry: PeriodicTask,
}

impl Scheduler {
    /// Build the schedule for a loop starting at `start_ms`.
    ///
    /// The control task is due on the first tick.  Telemetry is due on the
    /// first tick only when `telemetry_on_start` is set; otherwise it waits
    /// one full period.
    pub fn new(config: &ControlConfig, start_ms: u64) -> Self {
        let control = PeriodicTask::new("control", u64::from(config.control_period_ms));
        let telemetry_period = u64::from(config.telemetry_period_ms);
        let telemetry = if config.telemetry_on_start {
            PeriodicTask::new("telemetry", telemetry_period)
        } else {
            PeriodicTask::seeded("telemetry", telemetry_period, start_ms)
        };
        Self { control, telemetry }
    }

    /// Tick the scheduler.  Call once per main-loop iteration.
    ///
    /// Control always runs before telemetry, so a telemetry report issued
    /// in the same tick sees the freshly dispatched setpoint.  Each task is
    /// marked fired after its delegate call returns, whatever the outcome of
    /// the work inside it.
    pub fn tick(&mut self, now_ms: u64, delegate: &mut dyn SchedulerDelegate) -> FiredTasks {
        let mut fired = FiredTasks::default();

        if self.control.is_due(now_ms) {
            delegate.on_task_due(TaskId::Control, now_ms);
            self.control.mark_fired(now_ms);
            fired.control = true;
        }

        if self.telemetry.is_due(now_ms) {
            debug!("Scheduler: '{}' fired at {} ms", self.telemetry.label(), now_ms);
            delegate.on_task_due(TaskId::Telemetry, now_ms);
            self.telemetry.mark_fired(now_ms);
            fired.telemetry = true;
        }

        fired
    }

    /// Time until the nearest task is due, for sizing the loop sleep.
    pub fn millis_until_next(&self, now_ms: u64) -> u64 {
        self.control
            .millis_until_due(now_ms)
            .min(self.telemetry.millis_until_due(now_ms))
    }

    pub fn control(&self) -> &PeriodicTask {
        &self.control
    }

    pub fn telemetry(&self) -> &PeriodicTask {
        &self.telemetry
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

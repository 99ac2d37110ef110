//! Integration tests for the meter → filter → inverter pipeline.
//!
//! Drive [`PowerController`] tick by tick with mock ports and check what
//! reached the inverter and the telemetry sink.

use crate::mock_ports::{ManualClock, RecordingInverter, RecordingTelemetry, ScriptedMeter};

use gridbalance::app::service::{ControlOutcome, PowerController};
use gridbalance::config::{ControlConfig, SensorFailurePolicy};
use gridbalance::control::{PowerReading, Setpoint};
use gridbalance::error::{DispatchError, SensorError};

const PERIOD: u64 = 100;

fn controller(config: ControlConfig) -> PowerController {
    PowerController::new(config, 0).unwrap()
}

/// Tick once per control period starting at `from`, `n` times.
fn run_cycles(
    ctl: &mut PowerController,
    from: u64,
    n: u64,
    meter: &mut ScriptedMeter,
    inverter: &mut RecordingInverter,
    telemetry: &mut RecordingTelemetry,
) {
    for i in 0..n {
        ctl.tick(from + i * PERIOD, meter, inverter, telemetry);
    }
}

// ── Filter scenarios through the full loop ───────────────────

#[test]
fn export_ramps_up_then_deadzone_ramps_down() {
    let mut ctl = controller(ControlConfig::default());
    let mut meter = ScriptedMeter::steady(50)
        .then(Ok(PowerReading(-500)))
        .then(Ok(PowerReading(-500)));
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();

    run_cycles(&mut ctl, 0, 4, &mut meter, &mut inverter, &mut telemetry);

    assert_eq!(
        inverter.sent,
        vec![Setpoint(300), Setpoint(500), Setpoint(200), Setpoint(0)]
    );
    assert_eq!(ctl.setpoint(), Setpoint(0));
}

#[test]
fn import_discharges_within_limit() {
    let mut ctl = controller(ControlConfig::default());
    let mut meter = ScriptedMeter::steady(4_000);
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();

    run_cycles(&mut ctl, 0, 12, &mut meter, &mut inverter, &mut telemetry);

    assert_eq!(inverter.last(), Some(Setpoint(-2_500)));
    assert!(inverter.sent.iter().all(|s| s.watts() >= -2_500));
}

#[test]
fn steady_export_converges_and_stays() {
    let mut ctl = controller(ControlConfig::default());
    let mut meter = ScriptedMeter::steady(-1_000);
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();

    run_cycles(&mut ctl, 0, 10, &mut meter, &mut inverter, &mut telemetry);

    assert_eq!(
        &inverter.sent[..5],
        &[Setpoint(300), Setpoint(600), Setpoint(900), Setpoint(1_000), Setpoint(1_000)]
    );
    assert!(inverter.sent[3..].iter().all(|s| *s == Setpoint(1_000)));
}

#[test]
fn direction_reversal_takes_several_cycles() {
    let mut ctl = controller(ControlConfig::default());
    let mut meter = ScriptedMeter::steady(-900);
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();

    run_cycles(&mut ctl, 0, 3, &mut meter, &mut inverter, &mut telemetry);
    assert_eq!(ctl.setpoint(), Setpoint(900));

    meter.set_fallback(Ok(PowerReading(900)));
    run_cycles(&mut ctl, 300, 6, &mut meter, &mut inverter, &mut telemetry);

    assert_eq!(
        &inverter.sent[3..],
        &[
            Setpoint(600),
            Setpoint(300),
            Setpoint(0),
            Setpoint(-300),
            Setpoint(-600),
            Setpoint(-900)
        ]
    );
    for pair in inverter.sent.windows(2) {
        assert!((pair[1].watts() - pair[0].watts()).abs() <= 300);
    }
}

// ── Sensor failure ────────────────────────────────────────────

#[test]
fn sensor_failure_holds_setpoint_without_dispatch() {
    let mut ctl = controller(ControlConfig::default());
    let mut meter = ScriptedMeter::failing(SensorError::Timeout).then(Ok(PowerReading(-200)));
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();

    ctl.tick(0, &mut meter, &mut inverter, &mut telemetry);
    assert_eq!(ctl.setpoint(), Setpoint(200));

    let report = ctl.tick(100, &mut meter, &mut inverter, &mut telemetry);

    assert_eq!(report.control, Some(ControlOutcome::Held(SensorError::Timeout)));
    assert_eq!(ctl.setpoint(), Setpoint(200));
    assert_eq!(inverter.sent, vec![Setpoint(200)]);
    assert_eq!(ctl.scheduler().control().last_fired_ms(), Some(100));
    assert_eq!(ctl.last_known_reading(), Some(PowerReading(-200)));
    assert_eq!(ctl.stats().sensor_failures, 1);

    // Not retried before the next period.
    ctl.tick(150, &mut meter, &mut inverter, &mut telemetry);
    assert_eq!(meter.reads, 2);
}

#[test]
fn meter_recovery_resumes_from_held_setpoint() {
    let mut ctl = controller(ControlConfig::default());
    let mut meter = ScriptedMeter::steady(-2_000)
        .then(Ok(PowerReading(-2_000)))
        .then(Err(SensorError::ConnectFailed))
        .then(Err(SensorError::ConnectFailed));
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();

    run_cycles(&mut ctl, 0, 5, &mut meter, &mut inverter, &mut telemetry);

    assert_eq!(
        inverter.sent,
        vec![Setpoint(300), Setpoint(600), Setpoint(900)]
    );
    assert_eq!(ctl.stats().sensor_failures, 2);
}

#[test]
fn ramp_to_zero_policy_parks_the_battery() {
    let config = ControlConfig {
        sensor_failure_policy: SensorFailurePolicy::RampToZero,
        ..Default::default()
    };
    let mut ctl = controller(config);
    let mut meter = ScriptedMeter::failing(SensorError::Io)
        .then(Ok(PowerReading(-2_000)))
        .then(Ok(PowerReading(-2_000)))
        .then(Ok(PowerReading(-2_000)));
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();

    run_cycles(&mut ctl, 0, 3, &mut meter, &mut inverter, &mut telemetry);
    assert_eq!(ctl.setpoint(), Setpoint(900));

    let report = ctl.tick(300, &mut meter, &mut inverter, &mut telemetry);
    assert_eq!(
        report.control,
        Some(ControlOutcome::RampedToZero(
            Setpoint(600),
            SensorError::Io,
            None
        ))
    );

    run_cycles(&mut ctl, 400, 3, &mut meter, &mut inverter, &mut telemetry);
    assert_eq!(
        &inverter.sent[3..],
        &[Setpoint(600), Setpoint(300), Setpoint(0), Setpoint(0)]
    );
    assert_eq!(ctl.stats().sensor_failures, 4);
}

#[test]
fn ramp_to_zero_surfaces_rejected_delivery() {
    let config = ControlConfig {
        sensor_failure_policy: SensorFailurePolicy::RampToZero,
        ..Default::default()
    };
    let mut ctl = controller(config);
    let mut meter = ScriptedMeter::failing(SensorError::Timeout).then(Ok(PowerReading(-1_000)));
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();

    ctl.tick(0, &mut meter, &mut inverter, &mut telemetry);
    assert_eq!(ctl.setpoint(), Setpoint(300));

    inverter.reject_with = Some(DispatchError::Rejected(503));
    let report = ctl.tick(100, &mut meter, &mut inverter, &mut telemetry);

    assert_eq!(
        report.control,
        Some(ControlOutcome::RampedToZero(
            Setpoint(0),
            SensorError::Timeout,
            Some(DispatchError::Rejected(503))
        ))
    );
    let stats = ctl.stats();
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.dispatch_failures, 1);
}

// ── Dispatch and telemetry failures ───────────────────────────

#[test]
fn dispatch_failure_keeps_setpoint_and_schedule() {
    let mut ctl = controller(ControlConfig::default());
    let mut meter = ScriptedMeter::steady(-500);
    let mut inverter = RecordingInverter::rejecting(DispatchError::Rejected(503));
    let mut telemetry = RecordingTelemetry::new();

    let report = ctl.tick(0, &mut meter, &mut inverter, &mut telemetry);
    assert_eq!(
        report.control,
        Some(ControlOutcome::DispatchFailed(
            Setpoint(300),
            DispatchError::Rejected(503)
        ))
    );
    // No retry within the tick or before the next period.
    ctl.tick(50, &mut meter, &mut inverter, &mut telemetry);
    assert_eq!(inverter.sent.len(), 1);

    // The computed setpoint stands; the next cycle ramps on from it.
    assert_eq!(ctl.setpoint(), Setpoint(300));
    inverter.reject_with = None;
    ctl.tick(100, &mut meter, &mut inverter, &mut telemetry);
    assert_eq!(inverter.last(), Some(Setpoint(500)));

    let stats = ctl.stats();
    assert_eq!(stats.dispatch_failures, 1);
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.control_cycles, 2);
}

#[test]
fn telemetry_failure_does_not_disturb_control() {
    let config = ControlConfig {
        telemetry_on_start: true,
        ..Default::default()
    };
    let mut ctl = controller(config);
    let mut meter = ScriptedMeter::steady(-500);
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::failing();

    let report = ctl.tick(0, &mut meter, &mut inverter, &mut telemetry);
    assert!(report.fired.control && report.fired.telemetry);
    ctl.tick(100, &mut meter, &mut inverter, &mut telemetry);

    assert_eq!(inverter.sent, vec![Setpoint(300), Setpoint(500)]);
    assert_eq!(ctl.stats().telemetry_failures, 1);
    assert_eq!(ctl.scheduler().telemetry().last_fired_ms(), Some(0));
}

#[test]
fn control_dispatch_precedes_telemetry_in_shared_tick() {
    let config = ControlConfig {
        telemetry_on_start: true,
        ..Default::default()
    };
    let mut ctl = controller(config);
    let mut meter = ScriptedMeter::steady(-500);
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();

    ctl.tick(0, &mut meter, &mut inverter, &mut telemetry);

    assert_eq!(telemetry.reports, vec![(PowerReading(-500), Setpoint(300))]);
}

// ── Multi-rate timing ─────────────────────────────────────────

#[test]
fn ten_second_run_at_one_ms_ticks() {
    let mut ctl = controller(ControlConfig::default());
    let mut meter = ScriptedMeter::steady(-500);
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();
    let mut telemetry_at = Vec::new();

    for now in 1..=10_000 {
        let report = ctl.tick(now, &mut meter, &mut inverter, &mut telemetry);
        if report.fired.telemetry {
            telemetry_at.push(now);
        }
    }

    assert_eq!(ctl.stats().control_cycles, 100);
    assert_eq!(meter.reads, 100);
    assert_eq!(telemetry_at, vec![10_000]);
    assert_eq!(telemetry.reports, vec![(PowerReading(-500), Setpoint(500))]);
}

#[test]
fn poll_reads_the_injected_clock() {
    let mut ctl = controller(ControlConfig::default());
    let clock = ManualClock::at(0);
    let mut meter = ScriptedMeter::steady(-500);
    let mut inverter = RecordingInverter::new();
    let mut telemetry = RecordingTelemetry::new();

    ctl.poll(&clock, &mut meter, &mut inverter, &mut telemetry);
    clock.advance(99);
    assert!(!ctl.poll(&clock, &mut meter, &mut inverter, &mut telemetry).fired.control);
    clock.advance(1);
    assert!(ctl.poll(&clock, &mut meter, &mut inverter, &mut telemetry).fired.control);

    // A late loop iteration fires once, not three times.
    clock.set(450);
    ctl.poll(&clock, &mut meter, &mut inverter, &mut telemetry);
    ctl.poll(&clock, &mut meter, &mut inverter, &mut telemetry);
    assert_eq!(meter.reads, 3);
}

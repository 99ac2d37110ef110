//! Fuzz target: `filter::compute`
//!
//! Arbitrary tuning, reading and previous setpoint.  The filter must not
//! overflow or panic, must stay inside the power window, and from an
//! in-window setpoint must not slew by more than one ramp step.
//!
//! cargo fuzz run fuzz_control_filter

#![no_main]

use gridbalance::config::ControlConfig;
use gridbalance::control::filter::compute;
use gridbalance::control::{PowerReading, Setpoint};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (i32, i32, i32, i32, i32, i32)| {
    let (reading, previous, deadzone, charge, discharge, ramp) = input;
    let config = ControlConfig {
        deadzone_w: deadzone,
        max_charge_w: charge,
        max_discharge_w: discharge,
        ramp_w_per_cycle: ramp,
        ..Default::default()
    };

    let next = compute(PowerReading(reading), Setpoint(previous), &config);

    if config.validate().is_ok() {
        assert!(next.watts() <= charge && next.watts() >= -discharge);
        if (-discharge..=charge).contains(&previous) {
            let delta = (i64::from(next.watts()) - i64::from(previous)).abs();
            assert!(delta <= i64::from(ramp));
        }
    }
});

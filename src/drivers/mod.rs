//! Platform drivers.

pub mod watchdog;

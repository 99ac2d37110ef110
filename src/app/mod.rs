//! Application core: pure domain logic, zero I/O.
//!
//! This module contains the business rules for GridBalance: the control
//! filter, the multi-rate schedule and the controller that ties them to
//! the outside world.  All interaction with the meter, the inverter and the
//! telemetry sink happens through **port traits** defined in [`ports`],
//! keeping this layer fully testable without a network.

pub mod ports;
pub mod service;

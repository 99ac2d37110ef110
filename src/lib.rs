//! GridBalance firmware library.
//!
//! Zero-export battery controller: reads net grid power from a Modbus-TCP
//! meter every 100 ms and commands a home battery inverter to absorb
//! export and cover import.  The pure-logic modules are exposed for
//! integration testing; all ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod control;
pub mod error;
pub mod scheduler;

pub mod adapters;
pub mod drivers;

//! Control algorithms.

pub mod filter;

pub use filter::{ControlFilter, PowerReading, Setpoint};

//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements     | Connects to                     |
//! |------------|----------------|---------------------------------|
//! | `modbus`   | SensorPort     | Grid meter, Modbus-TCP          |
//! | `venus`    | ActuatorPort   | Battery inverter, HTTP POST     |
//! | `log_sink` | TelemetryPort  | Serial log output               |
//! | `nvs`      | ConfigPort     | NVS / in-memory store           |
//! | `time`     | TimePort       | ESP32 system timer              |
//! | `wifi`     | (none)         | ESP-IDF WiFi STA                |

pub mod log_sink;
pub mod modbus;
pub mod nvs;
pub mod time;
pub mod venus;
pub mod wifi;

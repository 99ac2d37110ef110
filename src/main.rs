//! GridBalance firmware entry point
//!
//! Hexagonal architecture with a single cooperative main loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  ModbusMeter      VenusDispatcher   LogTelemetrySink           │
//! │  (SensorPort)     (ActuatorPort)    (TelemetryPort)            │
//! │  NvsConfigStore   Esp32TimeAdapter  WifiStation                │
//! │  (ConfigPort)     (TimePort)        (link management)          │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │          PowerController (pure logic)                  │    │
//! │  │  ControlFilter · Scheduler (control 100 ms, telem 10 s)│    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use log::{error, info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::peripherals::Peripherals;

use gridbalance::adapters::log_sink::LogTelemetrySink;
use gridbalance::adapters::modbus::ModbusMeter;
use gridbalance::adapters::nvs::NvsConfigStore;
use gridbalance::adapters::time::Esp32TimeAdapter;
use gridbalance::adapters::venus::VenusDispatcher;
use gridbalance::adapters::wifi::{WifiStation, provision_credentials};
use gridbalance::app::ports::{ConfigPort, TimePort};
use gridbalance::app::service::PowerController;
use gridbalance::config::{SystemConfig, WifiConfig};
use gridbalance::drivers::watchdog::Watchdog;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  GridBalance v{}                     ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let store = match NvsConfigStore::new() {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("NVS unavailable ({}), config will not persist", e);
            None
        }
    };
    let mut config = match store.as_ref().map(|nvs| nvs.load()) {
        Some(Ok(cfg)) => cfg,
        Some(Err(e)) => {
            warn!("NVS config unusable ({}), using defaults", e);
            SystemConfig::default()
        }
        None => SystemConfig::default(),
    };
    config.validate()?;

    // A stored config without credentials adopts the build-time ones.
    let built_in = WifiConfig::default();
    if !config.wifi.is_provisioned() && built_in.is_provisioned() {
        match store.as_ref() {
            Some(nvs) => match provision_credentials(nvs, &built_in.ssid, &built_in.password) {
                Ok(saved) => config = saved,
                Err(e) => {
                    warn!("WiFi: built-in credentials not saved ({})", e);
                    config.wifi = built_in;
                }
            },
            None => config.wifi = built_in,
        }
    }

    // ── 3. Network ────────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let clock = Esp32TimeAdapter::new();

    // Association completes in the background; `poll` picks it up.
    let mut wifi = match WifiStation::new(peripherals.modem, sysloop, &config.wifi) {
        Ok(mut sta) => {
            if let Err(e) = sta.connect(clock.now_ms()) {
                warn!("WiFi: initial connect failed ({}), retrying in background", e);
            }
            Some(sta)
        }
        Err(e) => {
            error!("WiFi unavailable ({}); meter and inverter unreachable", e);
            None
        }
    };

    // ── 4. Construct adapters ─────────────────────────────────
    let mut meter = ModbusMeter::new(&config.meter, config.io_timeout_ms);
    let mut inverter = VenusDispatcher::new(&config.inverter, config.io_timeout_ms);
    let mut telemetry = LogTelemetrySink::new();

    // ── 5. Construct controller ───────────────────────────────
    let mut controller = PowerController::new(config.control.clone(), clock.now_ms())?;
    let tick_ms = u64::from(config.control.tick_interval_ms());

    let watchdog = Watchdog::new(config.watchdog_timeout_ms);

    info!("System ready. Entering control loop.");

    // ── 6. Main loop ──────────────────────────────────────────
    loop {
        controller.poll(&clock, &mut meter, &mut inverter, &mut telemetry);

        let now = clock.now_ms();
        if let Some(sta) = wifi.as_mut() {
            sta.poll(now);
        }

        // Feed watchdog on every iteration.
        watchdog.feed();

        let sleep_ms = controller
            .scheduler()
            .millis_until_next(now)
            .clamp(1, tick_ms);
        FreeRtos::delay_ms(u32::try_from(sleep_ms).unwrap_or(u32::MAX));
    }
}

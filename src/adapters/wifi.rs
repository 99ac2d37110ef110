//! WiFi station-mode adapter.
//!
//! The meter and the inverter both sit on the home LAN, so nothing works
//! until the station is associated and has an IP.  The main loop calls
//! [`WifiStation::poll`] every iteration; the control task keeps running
//! while the link is down (its I/O simply fails and is counted).
//!
//! Nothing here blocks: [`WifiStation::connect`] only starts association
//! and each `poll` checks whether the interface came up.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::EspWifi`, driven
//!   without the blocking wrapper.
//! - **all other targets**: a simulated link for host-side tests.
//!
//! ## Reconnection policy
//!
//! An attempt that is not up within [`ASSOCIATE_TIMEOUT_MS`] is abandoned.
//! After a failed attempt or a lost link the adapter waits an exponential
//! backoff (2 s → 4 s → 8 s … capped at 60 s) before retrying.

use core::fmt;
use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort};
use crate::config::{SystemConfig, WifiConfig};

#[cfg(target_os = "espidf")]
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::modem::Modem,
    wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi},
};

const INITIAL_BACKOFF_MS: u64 = 2_000;
const MAX_BACKOFF_MS: u64 = 60_000;

/// Association plus DHCP must finish within this window.
pub const ASSOCIATE_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    InvalidSsid,
    InvalidPassword,
    /// Driver setup or association failed.
    ConnectionFailed,
    /// Credentials were valid but could not be persisted.
    Storage(ConfigError),
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => {
                write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)")
            }
            Self::ConnectionFailed => write!(f, "WiFi connection failed"),
            Self::Storage(e) => write!(f, "credentials not saved: {e}"),
        }
    }
}

impl std::error::Error for WifiError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Disconnected,
    /// Association started at `since_ms`; waiting for the interface.
    Connecting { attempt: u32, since_ms: u64 },
    Connected,
    Reconnecting { attempt: u32 },
}

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

/// Every byte in `0x20..=0x7E` (space through tilde).
fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

pub fn validate_ssid(ssid: &str) -> Result<(), WifiError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(WifiError::InvalidSsid);
    }
    Ok(())
}

/// Empty means an open network; otherwise WPA2 length rules apply.
pub fn validate_password(password: &str) -> Result<(), WifiError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(WifiError::InvalidPassword);
    }
    Ok(())
}

pub fn validate_credentials(config: &WifiConfig) -> Result<(), WifiError> {
    validate_ssid(&config.ssid)?;
    validate_password(&config.password)
}

// ───────────────────────────────────────────────────────────────
// Provisioning
// ───────────────────────────────────────────────────────────────

/// Validate and persist station credentials, keeping the rest of the
/// stored config.  Returns the config as saved.
///
/// An unreadable stored config is replaced by defaults.
pub fn provision_credentials(
    store: &impl ConfigPort,
    ssid: &str,
    password: &str,
) -> Result<SystemConfig, WifiError> {
    validate_ssid(ssid)?;
    validate_password(password)?;

    let mut config = store.load().unwrap_or_else(|e| {
        warn!("WiFi: stored config unreadable ({}), provisioning over defaults", e);
        SystemConfig::default()
    });
    config.wifi = WifiConfig::new(ssid, password);
    store.save(&config).map_err(WifiError::Storage)?;
    info!("WiFi: credentials for '{}' saved", ssid);
    Ok(config)
}

// ───────────────────────────────────────────────────────────────
// Station
// ───────────────────────────────────────────────────────────────

pub struct WifiStation {
    state: WifiState,
    ssid: heapless::String<32>,
    backoff_ms: u64,
    next_attempt_ms: u64,
    #[cfg(target_os = "espidf")]
    wifi: EspWifi<'static>,
    /// Simulation: whether the access point is reachable.
    #[cfg(not(target_os = "espidf"))]
    sim_link: bool,
    #[cfg(not(target_os = "espidf"))]
    sim_associated: bool,
}

impl WifiStation {
    /// Bring up the WiFi driver in station mode.  Does not associate yet.
    #[cfg(target_os = "espidf")]
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        config: &WifiConfig,
    ) -> Result<Self, WifiError> {
        validate_credentials(config)?;

        let mut wifi = EspWifi::new(modem, sysloop, None).map_err(|e| {
            warn!("WiFi: driver init failed: {}", e);
            WifiError::ConnectionFailed
        })?;

        let client = ClientConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| WifiError::InvalidSsid)?,
            password: config
                .password
                .as_str()
                .try_into()
                .map_err(|_| WifiError::InvalidPassword)?,
            auth_method: if config.password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        };
        wifi.set_configuration(&Configuration::Client(client))
            .map_err(|_| WifiError::ConnectionFailed)?;
        wifi.start().map_err(|_| WifiError::ConnectionFailed)?;
        info!("WiFi: station started");

        Ok(Self {
            state: WifiState::Disconnected,
            ssid: config.ssid.clone(),
            backoff_ms: INITIAL_BACKOFF_MS,
            next_attempt_ms: 0,
            wifi,
        })
    }

    /// Simulated station; the access point starts reachable.
    #[cfg(not(target_os = "espidf"))]
    pub fn new(config: &WifiConfig) -> Result<Self, WifiError> {
        validate_credentials(config)?;
        info!("WiFi(sim): station started");
        Ok(Self {
            state: WifiState::Disconnected,
            ssid: config.ssid.clone(),
            backoff_ms: INITIAL_BACKOFF_MS,
            next_attempt_ms: 0,
            sim_link: true,
            sim_associated: false,
        })
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == WifiState::Connected
    }

    /// Simulation: make the access point reachable or not.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_sim_link(&mut self, up: bool) {
        self.sim_link = up;
        if !up {
            self.sim_associated = false;
        }
    }

    // ── Platform-specific ─────────────────────────────────────

    /// Start association.  Returns as soon as the request is queued.
    #[cfg(target_os = "espidf")]
    fn platform_begin_connect(&mut self) -> Result<(), WifiError> {
        self.wifi.connect().map_err(|e| {
            warn!("WiFi: connect request failed: {}", e);
            WifiError::ConnectionFailed
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_begin_connect(&mut self) -> Result<(), WifiError> {
        self.sim_associated = self.sim_link;
        Ok(())
    }

    /// Associated and holding an IP.
    #[cfg(target_os = "espidf")]
    fn platform_is_up(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_is_up(&self) -> bool {
        self.sim_link && self.sim_associated
    }

    #[cfg(target_os = "espidf")]
    fn platform_abort(&mut self) {
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi: disconnect failed: {}", e);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_abort(&mut self) {
        self.sim_associated = false;
    }

    // ── Connection management ─────────────────────────────────

    /// Start associating.  On failure the next retry is scheduled by
    /// backoff; success only means the attempt is under way.
    pub fn connect(&mut self, now_ms: u64) -> Result<(), WifiError> {
        let attempt = match self.state {
            WifiState::Reconnecting { attempt } => attempt.saturating_add(1),
            WifiState::Connecting { attempt, .. } => attempt,
            WifiState::Disconnected | WifiState::Connected => 0,
        };
        info!("WiFi: connecting to '{}' (attempt {})", self.ssid, attempt);
        match self.platform_begin_connect() {
            Ok(()) => {
                self.state = WifiState::Connecting {
                    attempt,
                    since_ms: now_ms,
                };
                Ok(())
            }
            Err(e) => {
                self.schedule_retry(attempt, now_ms, e);
                Err(e)
            }
        }
    }

    /// Give up on `attempt` and wait out the backoff.
    fn schedule_retry(&mut self, attempt: u32, now_ms: u64, reason: WifiError) {
        self.state = WifiState::Reconnecting { attempt };
        self.next_attempt_ms = now_ms.saturating_add(self.backoff_ms);
        warn!(
            "WiFi: {} (attempt {}), retry in {} ms",
            reason, attempt, self.backoff_ms
        );
        self.backoff_ms = (self.backoff_ms * 2).min(MAX_BACKOFF_MS);
    }

    /// Advance the link state machine.  Never waits on the driver.
    pub fn poll(&mut self, now_ms: u64) {
        match self.state {
            WifiState::Connected => {
                if !self.platform_is_up() {
                    warn!("WiFi: link lost");
                    self.state = WifiState::Reconnecting { attempt: 0 };
                    self.next_attempt_ms = now_ms;
                }
            }
            WifiState::Connecting { attempt, since_ms } => {
                if self.platform_is_up() {
                    self.state = WifiState::Connected;
                    self.backoff_ms = INITIAL_BACKOFF_MS;
                    info!("WiFi: connected");
                } else if now_ms.saturating_sub(since_ms) >= ASSOCIATE_TIMEOUT_MS {
                    self.platform_abort();
                    self.schedule_retry(attempt, now_ms, WifiError::ConnectionFailed);
                }
            }
            WifiState::Disconnected | WifiState::Reconnecting { .. } => {
                if now_ms >= self.next_attempt_ms {
                    let _ = self.connect(now_ms);
                }
            }
        }
    }
}

//! Battery inverter adapter: HTTP setpoint push.
//!
//! Implements [`ActuatorPort`] with a single `POST` per setpoint:
//!
//! ```text
//! POST http://192.168.1.30:80/api/power
//! Content-Type: application/json
//! Connection: close
//!
//! {"power":300}
//! ```
//!
//! Only the status code of the reply is inspected; a 2xx status is
//! success and anything else is [`DispatchError::Rejected`].
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `EspHttpConnection` driven through
//!   `embedded_svc::http::client::Client`, one connection per request.
//! - **all other targets**: `reqwest::blocking::Client` with keep-alive
//!   pooling disabled.
//!
//! Both bound the whole request by the configured I/O timeout.

use std::time::Duration;

use log::trace;
use serde::Serialize;

use crate::app::ports::ActuatorPort;
use crate::config::InverterConfig;
use crate::control::Setpoint;
use crate::error::DispatchError;

#[cfg(target_os = "espidf")]
use embedded_svc::{http::client::Client, io::Write};
#[cfg(target_os = "espidf")]
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};

/// JSON body accepted by the inverter's power endpoint.
#[derive(Debug, Serialize)]
struct PowerCommand {
    power: i32,
}

/// Serialize the request body for `setpoint`.
pub fn encode_power_body(setpoint: Setpoint) -> Result<Vec<u8>, DispatchError> {
    serde_json::to_vec(&PowerCommand {
        power: setpoint.watts(),
    })
    .map_err(|_| DispatchError::Encode)
}

/// Absolute URL of the power endpoint.
pub fn power_url(config: &InverterConfig) -> String {
    format!("http://{}:{}{}", config.host, config.port, config.path)
}

/// HTTP client for the battery inverter's power endpoint.
pub struct VenusDispatcher {
    url: String,
    timeout: Duration,
    #[cfg(not(target_os = "espidf"))]
    client: Option<reqwest::blocking::Client>,
}

impl VenusDispatcher {
    pub fn new(config: &InverterConfig, io_timeout_ms: u32) -> Self {
        Self {
            url: power_url(config),
            timeout: Duration::from_millis(u64::from(io_timeout_ms)),
            #[cfg(not(target_os = "espidf"))]
            client: None,
        }
    }

    // ── Platform-specific ─────────────────────────────────────

    /// POST `body` and return the HTTP status.
    #[cfg(target_os = "espidf")]
    fn post(&mut self, body: &[u8]) -> Result<u16, DispatchError> {
        let connection = EspHttpConnection::new(&Configuration {
            timeout: Some(self.timeout),
            ..Default::default()
        })
        .map_err(|e| esp_error(e.code()))?;
        let mut client = Client::wrap(connection);

        let content_length = body.len().to_string();
        let headers = [
            ("content-type", "application/json"),
            ("content-length", content_length.as_str()),
            ("connection", "close"),
        ];
        let mut request = client
            .post(&self.url, &headers)
            .map_err(|e| esp_error(e.0.code()))?;
        request.write_all(body).map_err(|e| esp_error(e.0.code()))?;
        request.flush().map_err(|e| esp_error(e.0.code()))?;
        let response = request.submit().map_err(|e| esp_error(e.0.code()))?;
        Ok(response.status())
    }

    #[cfg(not(target_os = "espidf"))]
    fn post(&mut self, body: &[u8]) -> Result<u16, DispatchError> {
        use reqwest::header::{CONNECTION, CONTENT_TYPE};

        let url = self.url.clone();
        let response = self
            .client()?
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONNECTION, "close")
            .body(body.to_vec())
            .send()
            .map_err(|e| reqwest_error(&e))?;
        Ok(response.status().as_u16())
    }

    /// Built on first use so construction stays infallible.
    #[cfg(not(target_os = "espidf"))]
    fn client(&mut self) -> Result<&reqwest::blocking::Client, DispatchError> {
        if self.client.is_none() {
            let client = reqwest::blocking::Client::builder()
                .timeout(self.timeout)
                .connect_timeout(self.timeout)
                .pool_max_idle_per_host(0)
                .build()
                .map_err(|e| {
                    log::warn!("Inverter: HTTP client setup failed: {}", e);
                    DispatchError::Io
                })?;
            self.client = Some(client);
        }
        self.client.as_ref().ok_or(DispatchError::Io)
    }
}

#[cfg(target_os = "espidf")]
fn esp_error(code: esp_idf_svc::sys::esp_err_t) -> DispatchError {
    use esp_idf_svc::sys::{ESP_ERR_HTTP_CONNECT, ESP_ERR_HTTP_EAGAIN, ESP_ERR_TIMEOUT, esp_err_t};

    if code == ESP_ERR_HTTP_CONNECT as esp_err_t {
        DispatchError::ConnectFailed
    } else if code == ESP_ERR_HTTP_EAGAIN as esp_err_t || code == ESP_ERR_TIMEOUT as esp_err_t {
        DispatchError::Timeout
    } else {
        DispatchError::Io
    }
}

#[cfg(not(target_os = "espidf"))]
fn reqwest_error(e: &reqwest::Error) -> DispatchError {
    if e.is_timeout() {
        DispatchError::Timeout
    } else if e.is_connect() {
        DispatchError::ConnectFailed
    } else {
        DispatchError::Io
    }
}

impl ActuatorPort for VenusDispatcher {
    fn dispatch(&mut self, setpoint: Setpoint) -> Result<(), DispatchError> {
        let body = encode_power_body(setpoint)?;
        let status = self.post(&body)?;
        trace!("Inverter: {} -> HTTP {}", setpoint, status);
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(DispatchError::Rejected(status))
        }
    }
}

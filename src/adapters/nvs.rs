//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`ConfigPort`] for GridBalance.  The whole [`SystemConfig`]
//! is stored as one postcard blob under `gridbal::syscfg`.
//!
//! - Config validation: every field is range-checked before persistence
//!   and again after loading, so a blob written by an older build with
//!   looser limits is refused instead of driving the inverter.
//! - Atomic writes: ESP-IDF NVS commits are atomic per `nvs_commit()`.
//! - Host builds keep the blob in memory (dev/test only).

use log::info;

use crate::app::ports::{ConfigError, ConfigPort};
use crate::config::SystemConfig;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use core::ffi::CStr;

const CONFIG_NAMESPACE: &str = "gridbal";
const CONFIG_KEY: &str = "syscfg";

#[cfg(target_os = "espidf")]
const CONFIG_NAMESPACE_C: &CStr = c"gridbal";
#[cfg(target_os = "espidf")]
const CONFIG_KEY_C: &CStr = c"syscfg";

/// Upper bound on a stored config blob.
pub const MAX_BLOB_SIZE: usize = 1024;

pub struct NvsConfigStore {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsConfigStore {
    /// Create the store and initialise NVS flash.
    ///
    /// On first boot or after a version mismatch the NVS partition is
    /// erased and re-initialised.  Returns [`ConfigError::IoError`] if
    /// flash initialisation fails unrecoverably.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any other NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                log::warn!("NVS: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("NvsConfigStore: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsConfigStore: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key() -> String {
        format!("{}::{}", CONFIG_NAMESPACE, CONFIG_KEY)
    }

    /// Overwrite the stored blob with raw bytes (simulation only).
    #[cfg(not(target_os = "espidf"))]
    pub fn write_raw(&self, bytes: &[u8]) {
        self.store
            .borrow_mut()
            .insert(Self::composite_key(), bytes.to_vec());
    }

    /// Open the config namespace, run `f` with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(write: bool, f: F) -> Result<T, esp_err_t>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, esp_err_t>,
    {
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(CONFIG_NAMESPACE_C.as_ptr(), mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    /// Read the raw blob.  `Ok(None)` when nothing has been stored yet.
    #[cfg(target_os = "espidf")]
    fn read_blob() -> Result<Option<Vec<u8>>, esp_err_t> {
        let result = Self::with_nvs_handle(false, |handle| {
            let mut size: usize = 0;
            // First call: query size.
            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    CONFIG_KEY_C.as_ptr(),
                    core::ptr::null_mut(),
                    &mut size,
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            if size == 0 || size > MAX_BLOB_SIZE {
                return Err(ESP_ERR_NVS_INVALID_LENGTH);
            }

            let mut buf = vec![0u8; size];
            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    CONFIG_KEY_C.as_ptr(),
                    buf.as_mut_ptr() as *mut _,
                    &mut size,
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            buf.truncate(size);
            Ok(buf)
        });

        match result {
            Ok(bytes) => Ok(Some(bytes)),
            // A namespace that was never written cannot be opened read-only.
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Decode and validate a stored blob.
fn decode_config(bytes: &[u8]) -> Result<SystemConfig, ConfigError> {
    if bytes.len() > MAX_BLOB_SIZE {
        return Err(ConfigError::Corrupted);
    }
    let cfg: SystemConfig = postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
    cfg.validate()?;
    Ok(cfg)
}

impl ConfigPort for NvsConfigStore {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        let stored = self.store.borrow().get(&Self::composite_key()).cloned();

        #[cfg(target_os = "espidf")]
        let stored = Self::read_blob().map_err(|e| {
            log::warn!("NvsConfigStore: NVS read error {}", e);
            ConfigError::IoError
        })?;

        match stored {
            Some(bytes) => {
                let cfg = decode_config(&bytes)?;
                info!("NvsConfigStore: loaded config ({} bytes)", bytes.len());
                Ok(cfg)
            }
            None => {
                info!("NvsConfigStore: no stored config, using defaults");
                Ok(SystemConfig::default())
            }
        }
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        if bytes.len() > MAX_BLOB_SIZE {
            return Err(ConfigError::IoError);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .borrow_mut()
                .insert(Self::composite_key(), bytes);
            info!("NvsConfigStore: config saved (simulation)");
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let result = Self::with_nvs_handle(true, |handle| {
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        CONFIG_KEY_C.as_ptr(),
                        bytes.as_ptr() as *const _,
                        bytes.len(),
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            match result {
                Ok(()) => {
                    info!(
                        "NvsConfigStore: config saved to NVS {}::{} ({} bytes)",
                        CONFIG_NAMESPACE,
                        CONFIG_KEY,
                        bytes.len()
                    );
                    Ok(())
                }
                Err(e) => {
                    log::warn!("NvsConfigStore: NVS write error {}", e);
                    Err(ConfigError::IoError)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_loads_defaults() {
        let store = NvsConfigStore::new().unwrap();
        let cfg = store.load().unwrap();
        assert_eq!(cfg.control.deadzone_w, SystemConfig::default().control.deadzone_w);
    }

    #[test]
    fn save_then_load() {
        let store = NvsConfigStore::new().unwrap();
        let mut cfg = SystemConfig::default();
        cfg.control.deadzone_w = 120;
        cfg.control.ramp_w_per_cycle = 150;
        store.save(&cfg).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.control.deadzone_w, 120);
        assert_eq!(loaded.control.ramp_w_per_cycle, 150);
    }

    #[test]
    fn invalid_config_is_not_persisted() {
        let store = NvsConfigStore::new().unwrap();
        let mut cfg = SystemConfig::default();
        cfg.control.ramp_w_per_cycle = 0;
        assert!(matches!(
            store.save(&cfg),
            Err(ConfigError::ValidationFailed(_))
        ));
        // Nothing stored, still defaults.
        assert_eq!(store.load().unwrap().control.ramp_w_per_cycle, 300);
    }

    #[test]
    fn garbage_blob_is_corrupted() {
        let store = NvsConfigStore::new().unwrap();
        store.write_raw(&[0xFF; 8]);
        assert_eq!(store.load().unwrap_err(), ConfigError::Corrupted);
    }

    #[test]
    fn stored_invalid_config_is_refused_on_load() {
        let store = NvsConfigStore::new().unwrap();
        let mut cfg = SystemConfig::default();
        cfg.control.max_charge_w = -1;
        store.write_raw(&postcard::to_allocvec(&cfg).unwrap());
        assert!(matches!(
            store.load(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }
}

//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`].
//!
//! - Config validation: every field is range-checked before persistence.
//! - Namespace isolation: config lives in `bleota`, bond records in their
//!   own namespace (see [`crate::bonding`]).
//! - Atomic writes: ESP-IDF NVS commits each blob atomically.
//!
//! On ESP-IDF the safe `esp_idf_svc::nvs` wrapper is used; on the host a
//! `HashMap` stands in so the domain can be exercised in tests.

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::OtaConfig;
use crate::gatt::att::{ATT_DEFAULT_MTU, ATT_MAX_VALUE_LEN};

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};

pub const CONFIG_NAMESPACE: &str = "bleota";
pub const CONFIG_KEY: &str = "otacfg";

/// Largest blob either side of the port ever stores.
const MAX_BLOB_SIZE: usize = 1024;

/// Longest settle delay accepted before a reset.
const MAX_RESET_SETTLE_MS: u32 = 10_000;

pub struct NvsAdapter {
    #[cfg(target_os = "espidf")]
    partition: EspNvsPartition<NvsDefault>,
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Take the default NVS partition.
    #[cfg(target_os = "espidf")]
    pub fn new(partition: EspNvsPartition<NvsDefault>) -> Self {
        info!("NvsAdapter: ESP-IDF NVS ready");
        Self { partition }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        info!("NvsAdapter: simulation backend");
        Self {
            store: std::cell::RefCell::new(HashMap::new()),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    #[cfg(target_os = "espidf")]
    fn open(&self, namespace: &str, write: bool) -> Result<EspNvs<NvsDefault>, StorageError> {
        EspNvs::new(self.partition.clone(), namespace, write).map_err(|e| {
            warn!("NvsAdapter: open '{}' failed: {:?}", namespace, e);
            StorageError::IoError
        })
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Range-check a config before it is persisted.
pub fn validate_config(cfg: &OtaConfig) -> Result<(), ConfigError> {
    if cfg.device_name.is_empty() {
        return Err(ConfigError::ValidationFailed("device_name must not be empty"));
    }
    if !(ATT_DEFAULT_MTU..=ATT_MAX_VALUE_LEN as u16).contains(&cfg.mtu) {
        return Err(ConfigError::ValidationFailed("mtu must be 23..512"));
    }
    // Advertising interval range allowed by Bluetooth Core v5.3: 0x0020..=0x4000.
    if !(0x0020..=0x4000).contains(&cfg.adv_interval_min)
        || !(0x0020..=0x4000).contains(&cfg.adv_interval_max)
    {
        return Err(ConfigError::ValidationFailed(
            "advertising interval must be 0x0020..0x4000",
        ));
    }
    if cfg.adv_interval_min > cfg.adv_interval_max {
        return Err(ConfigError::ValidationFailed(
            "adv_interval_min must be <= adv_interval_max",
        ));
    }
    if cfg.reset_settle_ms > MAX_RESET_SETTLE_MS {
        return Err(ConfigError::ValidationFailed(
            "reset_settle_ms must be 0..10000",
        ));
    }
    if cfg.max_image_size == 0 {
        return Err(ConfigError::ValidationFailed("max_image_size must be > 0"));
    }
    Ok(())
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<OtaConfig, ConfigError> {
        let mut buf = [0u8; MAX_BLOB_SIZE];
        match self.read(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf) {
            Ok(len) => {
                let cfg: OtaConfig =
                    postcard::from_bytes(&buf[..len]).map_err(|_| ConfigError::Corrupted)?;
                info!("NvsAdapter: loaded config ({} bytes)", len);
                Ok(cfg)
            }
            Err(StorageError::NotFound) => {
                info!("NvsAdapter: no stored config, using defaults");
                Ok(OtaConfig::default())
            }
            Err(e) => {
                warn!("NvsAdapter: config read error {}, using defaults", e);
                Ok(OtaConfig::default())
            }
        }
    }

    fn save(&self, config: &OtaConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        {
            let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
            self.store.borrow_mut().insert(key, bytes);
            info!("NvsAdapter: config saved (simulation)");
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let mut nvs = self
                .open(CONFIG_NAMESPACE, true)
                .map_err(|_| ConfigError::IoError)?;
            nvs.set_blob(CONFIG_KEY, &bytes).map_err(|e| {
                warn!("NvsAdapter: NVS write error {:?}", e);
                ConfigError::IoError
            })?;
            info!("NvsAdapter: config saved to NVS ({} bytes)", bytes.len());
            Ok(())
        }
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            match self.store.borrow().get(&composite) {
                Some(data) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                None => Err(StorageError::NotFound),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let nvs = self.open(namespace, false)?;
            match nvs.get_blob(key, buf) {
                Ok(Some(data)) => Ok(data.len()),
                Ok(None) => Err(StorageError::NotFound),
                Err(e) => {
                    warn!("NvsAdapter: read {}/{} failed: {:?}", namespace, key, e);
                    Err(StorageError::IoError)
                }
            }
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::Full);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().insert(composite, data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let mut nvs = self.open(namespace, true)?;
            nvs.set_blob(key, data).map_err(|e| {
                warn!("NvsAdapter: write {}/{} failed: {:?}", namespace, key, e);
                StorageError::IoError
            })
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().remove(&composite);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let mut nvs = self.open(namespace, true)?;
            nvs.remove(key)
                .map(|_| ())
                .map_err(|_| StorageError::IoError)
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow().contains_key(&composite)
        }

        #[cfg(target_os = "espidf")]
        {
            self.open(namespace, false)
                .ok()
                .and_then(|nvs| nvs.contains(key).ok())
                .unwrap_or(false)
        }
    }
}

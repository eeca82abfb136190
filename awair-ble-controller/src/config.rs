//! Provisioning configuration
//!
//! Everything has a default that matches the shipping sensor; a JSON file
//! can override any subset of fields.

use std::path::Path;
use std::time::Duration;

use awair_proto::ble;
use uuid::Uuid;

/// GATT layout of the provisioning service
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GattProfile {
    pub service: Uuid,
    /// Characteristic the device notifies JSON fragments on
    pub notify: Uuid,
    /// Characteristic commands are written to
    pub write: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: Uuid::from_u128(ble::SERVICE_UUID),
            notify: Uuid::from_u128(ble::NOTIFY_UUID),
            write: Uuid::from_u128(ble::WRITE_UUID),
        }
    }
}

/// The two timeout classes used while talking to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Ordinary command/response exchanges
    pub response: Duration,
    /// Each wait while polling for Wi-Fi association
    pub wifi_connect: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            response: Duration::from_secs(5),
            wifi_connect: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Local name matched while scanning when no explicit target is given
    pub device_name: String,
    pub scan_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub response_timeout_secs: u64,
    pub wifi_connect_timeout_secs: u64,
    /// Upper bound on bytes held while waiting for a message to complete.
    /// `None` means unbounded.
    pub max_pending_bytes: Option<usize>,
    /// Depth of the queue between the notification stream and reassembly
    pub fragment_queue: usize,
    pub profile: GattProfile,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        let timeouts = Timeouts::default();
        Self {
            device_name: ble::DEVICE_NAME.to_string(),
            scan_timeout_secs: 15,
            connect_timeout_secs: 15,
            response_timeout_secs: timeouts.response.as_secs(),
            wifi_connect_timeout_secs: timeouts.wifi_connect.as_secs(),
            max_pending_bytes: None,
            fragment_queue: 16,
            profile: GattProfile::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },
}

impl ProvisionConfig {
    /// Load a JSON config file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, else the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            response: Duration::from_secs(self.response_timeout_secs),
            wifi_connect: Duration::from_secs(self.wifi_connect_timeout_secs),
        }
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

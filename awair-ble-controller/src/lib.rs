//! Awair BLE Controller
//!
//! BLE client for provisioning Awair air-quality sensors: sets the locale,
//! joins Wi-Fi, checks connectivity, registers the device and installs its
//! MQTT token.
//!
//! # Example
//!
//! ```ignore
//! use awair_ble_controller::{ProvisionConfig, ProvisioningParams};
//! use awair_proto::WifiCredentials;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProvisionConfig::default();
//!
//!     let params = ProvisioningParams {
//!         country_code: "US".to_string(),
//!         wifi: WifiCredentials::new("MySSID", "MyPassword"),
//!         mqtt_token: "token".to_string(),
//!     };
//!     awair_ble_controller::provision(&config, None, params).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod ble;
mod config;
mod correlator;
mod sequencer;
mod transport;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, GattProfile, ProvisionConfig, Timeouts};
pub use correlator::{Correlator, Exchange, ExchangeError};
pub use sequencer::{
    ProvisionError, ProvisioningParams, ProvisioningSession, Step, StepError, run,
};
pub use transport::{Transport, TransportError};

use awair_proto::{Command, DecodedMessage, Reassembler};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Scan for BLE devices for `duration`
pub async fn scan(
    duration: std::time::Duration,
    config: &ProvisionConfig,
) -> Result<Vec<ble::AwairDevice>, Error> {
    Ok(ble::scan(duration, &config.device_name).await?)
}

async fn open(
    config: &ProvisionConfig,
    target: Option<&str>,
) -> Result<(Correlator<ble::BleTransport>, tokio::task::JoinHandle<()>), Error> {
    let connection = ble::connect(config, target).await?;
    Ok(Correlator::spawn(
        connection.transport,
        connection.fragments,
        Reassembler::new(config.max_pending_bytes),
        config.timeouts(),
    ))
}

/// Provision a device
///
/// # Arguments
/// * `target` - Device name/address pattern, or None to find any Awair device
/// * `params` - Country, Wi-Fi credentials and MQTT token to install
pub async fn provision(
    config: &ProvisionConfig,
    target: Option<&str>,
    params: ProvisioningParams,
) -> Result<ProvisioningSession, Error> {
    let (correlator, reassembly) = open(config, target).await?;

    let mut session = ProvisioningSession::new(params);
    let result = run(&correlator, &mut session).await;

    correlator.transport().disconnect().await;
    reassembly.abort();

    result?;
    Ok(session)
}

/// Read the firmware version of a device
pub async fn fw_version(
    config: &ProvisionConfig,
    target: Option<&str>,
) -> Result<DecodedMessage, Error> {
    let (correlator, reassembly) = open(config, target).await?;

    let result = async {
        let mut exchange = correlator.exchange().await;
        let timeout = exchange.timeouts().response;
        let status = exchange.await_message(timeout).await?;
        tracing::debug!(%status, "initial status");
        exchange.send_and_await(&Command::GetFwVersion, timeout).await
    }
    .await;

    correlator.transport().disconnect().await;
    reassembly.abort();

    Ok(result?)
}

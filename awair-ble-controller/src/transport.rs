//! The outbound half of the link, and the errors the link can raise

use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("no device matching {target:?} found within {timeout:?}")]
    DeviceNotFound { target: String, timeout: Duration },
    #[error("connection not established within {0:?}")]
    ConnectTimeout(Duration),
    #[error("expected {expected} {what}, got {found}")]
    DiscoveryMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("characteristic {0} not found")]
    MissingCharacteristic(Uuid),
}

/// Something commands can be written to.
///
/// Inbound bytes do not go through this trait: transports hand them over as
/// an `mpsc::Receiver<Vec<u8>>` of raw fragments.
pub trait Transport: Send + Sync {
    fn write(&self, bytes: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;
}

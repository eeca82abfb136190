//! BLE transport for Awair devices
//!
//! Scans for the sensor, connects, checks the GATT layout and subscribes to
//! the notify characteristic. Notification values are forwarded untouched
//! as raw fragments; reassembly happens elsewhere.

use std::collections::BTreeSet;
use std::time::Duration;

use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;

use awair_proto::ble::SERVICE_CHARACTERISTIC_COUNT;

use crate::{GattProfile, ProvisionConfig, Transport, TransportError};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A discovered BLE device
#[derive(Debug, Clone)]
pub struct AwairDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_awair: bool,
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(TransportError::NoAdapter)
}

// Some stacks wrap the advertised name, e.g. "nimble [AWAIR-R2]".
fn is_awair_name(name: &str, device_name: &str) -> bool {
    name == device_name || name.contains(&format!("[{device_name}"))
}

fn matches_target(name: &str, address: &str, target: Option<&str>, device_name: &str) -> bool {
    match target {
        Some(t) => name.contains(t) || address.contains(t),
        None => is_awair_name(name, device_name),
    }
}

/// Scan for BLE devices
///
/// Returns every device seen; those advertising `device_name` have
/// `is_awair = true`.
pub async fn scan(duration: Duration, device_name: &str) -> Result<Vec<AwairDevice>, TransportError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let address = peripheral.address().to_string();
            let is_awair = is_awair_name(&name, device_name);
            devices.push(AwairDevice { name, address, rssi: props.rssi, is_awair });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

/// Scan until a device matching `target` (name or address fragment), or
/// advertising `device_name` when no target is given, shows up.
pub async fn find_device(
    adapter: &Adapter,
    target: Option<&str>,
    device_name: &str,
    timeout: Duration,
) -> Result<Peripheral, TransportError> {
    adapter.start_scan(ScanFilter::default()).await?;

    let search = async {
        loop {
            for peripheral in adapter.peripherals().await? {
                let Some(props) = peripheral.properties().await? else {
                    continue;
                };
                let name = props.local_name.unwrap_or_default();
                let address = peripheral.address().to_string();
                if matches_target(&name, &address, target, device_name) {
                    tracing::info!(%name, %address, "found device");
                    return Ok::<_, TransportError>(peripheral);
                }
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    };
    let found = tokio::time::timeout(timeout, search).await;

    if let Err(e) = adapter.stop_scan().await {
        tracing::warn!("failed to stop scan: {e}");
    }

    match found {
        Ok(result) => result,
        Err(_) => Err(TransportError::DeviceNotFound {
            target: target.unwrap_or(device_name).to_string(),
            timeout,
        }),
    }
}

/// Pick the notify and write characteristics out of a discovered service
/// list. The provisioning service must appear exactly once and carry
/// exactly two characteristics.
pub fn select_channels(
    services: &BTreeSet<Service>,
    profile: &GattProfile,
) -> Result<(Characteristic, Characteristic), TransportError> {
    let matching: Vec<&Service> = services.iter().filter(|s| s.uuid == profile.service).collect();
    let [service] = matching.as_slice() else {
        return Err(TransportError::DiscoveryMismatch {
            what: "provisioning services",
            expected: 1,
            found: matching.len(),
        });
    };

    let characteristics = &service.characteristics;
    if characteristics.len() != SERVICE_CHARACTERISTIC_COUNT {
        return Err(TransportError::DiscoveryMismatch {
            what: "characteristics",
            expected: SERVICE_CHARACTERISTIC_COUNT,
            found: characteristics.len(),
        });
    }

    let find = |uuid| {
        characteristics
            .iter()
            .find(|c| c.uuid == uuid)
            .cloned()
            .ok_or(TransportError::MissingCharacteristic(uuid))
    };
    Ok((find(profile.notify)?, find(profile.write)?))
}

/// Discover services and return `(notify, write)` characteristics
pub async fn discover_channels(
    peripheral: &Peripheral,
    profile: &GattProfile,
) -> Result<(Characteristic, Characteristic), TransportError> {
    peripheral.discover_services().await?;
    select_channels(&peripheral.services(), profile)
}

/// Subscribe to `notify` and forward its values as raw fragments.
///
/// The notification stream is opened before subscribing so the device's
/// unsolicited first status message is not missed.
pub async fn subscribe(
    peripheral: &Peripheral,
    notify: &Characteristic,
    queue: usize,
) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
    let mut notifications = peripheral.notifications().await?;
    peripheral.subscribe(notify).await?;

    let (tx, rx) = mpsc::channel(queue);
    let uuid = notify.uuid;
    tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            if notification.uuid != uuid {
                continue;
            }
            tracing::debug!(
                fragment = %String::from_utf8_lossy(&notification.value),
                "notification"
            );
            if tx.send(notification.value).await.is_err() {
                break;
            }
        }
        tracing::debug!("notification stream ended");
    });

    Ok(rx)
}

/// Write side of a connected device
pub struct BleTransport {
    peripheral: Peripheral,
    write: Characteristic,
}

impl BleTransport {
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    pub async fn disconnect(&self) {
        log_disconnect(self.peripheral.disconnect().await);
    }
}

fn log_disconnect(result: Result<(), btleplug::Error>) {
    if let Err(e) = result {
        tracing::debug!("disconnect failed: {e}");
    }
}

/// Run `disconnect` only when `result` is an error, then hand `result` back.
async fn disconnect_on_error<T, F>(result: Result<T, TransportError>, disconnect: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<(), btleplug::Error>>,
{
    if result.is_err() {
        log_disconnect(disconnect.await);
    }
    result
}

impl Transport for BleTransport {
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.peripheral
            .write(&self.write, bytes, WriteType::WithResponse)
            .await?;
        Ok(())
    }
}

/// A connected, subscribed device
pub struct Connection {
    pub transport: BleTransport,
    pub fragments: mpsc::Receiver<Vec<u8>>,
}

/// Find, connect, discover and subscribe
pub async fn connect(config: &ProvisionConfig, target: Option<&str>) -> Result<Connection, TransportError> {
    let adapter = get_adapter().await?;

    tracing::info!("finding device...");
    let peripheral =
        find_device(&adapter, target, &config.device_name, config.scan_timeout()).await?;

    // A timed-out connect can still complete later, so every failure below
    // tears the link down.
    let setup = async {
        tracing::info!("connecting...");
        tokio::time::timeout(config.connect_timeout(), peripheral.connect())
            .await
            .map_err(|_| TransportError::ConnectTimeout(config.connect_timeout()))??;

        tracing::info!("discovering characteristics...");
        let (notify, write) = discover_channels(&peripheral, &config.profile).await?;
        let fragments = subscribe(&peripheral, &notify, config.fragment_queue).await?;
        Ok::<_, TransportError>((write, fragments))
    };
    let (write, fragments) = disconnect_on_error(setup.await, peripheral.disconnect()).await?;

    Ok(Connection {
        transport: BleTransport { peripheral, write },
        fragments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use btleplug::api::CharPropFlags;
    use uuid::Uuid;

    fn characteristic(uuid: Uuid, service_uuid: Uuid) -> Characteristic {
        Characteristic {
            uuid,
            service_uuid,
            properties: CharPropFlags::empty(),
            descriptors: BTreeSet::new(),
        }
    }

    fn service(uuid: Uuid, characteristics: &[Uuid]) -> Service {
        Service {
            uuid,
            primary: true,
            characteristics: characteristics
                .iter()
                .map(|c| characteristic(*c, uuid))
                .collect(),
        }
    }

    #[test]
    fn selects_notify_and_write() {
        let profile = GattProfile::default();
        let services = BTreeSet::from([
            service(Uuid::from_u128(0x1800), &[Uuid::from_u128(0x2a00)]),
            service(profile.service, &[profile.write, profile.notify]),
        ]);

        let (notify, write) = select_channels(&services, &profile).unwrap();
        assert_eq!(notify.uuid, profile.notify);
        assert_eq!(write.uuid, profile.write);
    }

    #[test]
    fn missing_service_is_a_mismatch() {
        let profile = GattProfile::default();
        let services = BTreeSet::from([service(Uuid::from_u128(0x1800), &[])]);

        let err = select_channels(&services, &profile).unwrap_err();
        assert!(matches!(
            err,
            TransportError::DiscoveryMismatch { expected: 1, found: 0, .. }
        ));
    }

    #[test]
    fn extra_characteristic_is_a_mismatch() {
        let profile = GattProfile::default();
        let services = BTreeSet::from([service(
            profile.service,
            &[profile.notify, profile.write, Uuid::from_u128(0xdead)],
        )]);

        let err = select_channels(&services, &profile).unwrap_err();
        assert_eq!(err.to_string(), "expected 2 characteristics, got 3");
    }

    #[test]
    fn wrong_characteristic_is_reported() {
        let profile = GattProfile::default();
        let other = Uuid::from_u128(0xbeef);
        let services = BTreeSet::from([service(profile.service, &[profile.notify, other])]);

        let err = select_channels(&services, &profile).unwrap_err();
        assert!(matches!(err, TransportError::MissingCharacteristic(u) if u == profile.write));
    }

    #[tokio::test]
    async fn failed_setup_disconnects() {
        let disconnected = std::cell::Cell::new(false);
        let result: Result<(), _> = disconnect_on_error(
            Err(TransportError::ConnectTimeout(Duration::from_secs(15))),
            async {
                disconnected.set(true);
                Err(btleplug::Error::NotConnected)
            },
        )
        .await;

        assert!(disconnected.get());
        assert!(matches!(result, Err(TransportError::ConnectTimeout(_))));
    }

    #[tokio::test]
    async fn successful_setup_stays_connected() {
        let disconnected = std::cell::Cell::new(false);
        let result = disconnect_on_error(Ok(7), async {
            disconnected.set(true);
            Ok(())
        })
        .await;

        assert!(!disconnected.get());
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn target_matching() {
        assert!(matches_target("AWAIR-R2", "AA:BB", None, "AWAIR-R2"));
        assert!(matches_target("nimble [AWAIR-R2]", "AA:BB", None, "AWAIR-R2"));
        assert!(!matches_target("AWAIR-R1", "AA:BB", None, "AWAIR-R2"));
        assert!(matches_target("Other", "AA:BB:CC", Some("BB:CC"), "AWAIR-R2"));
        assert!(!matches_target("AWAIR-R2", "AA:BB", Some("kitchen"), "AWAIR-R2"));
    }
}

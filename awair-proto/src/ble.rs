//! BLE GATT Service Protocol Constants for Awair Device Provisioning
//!
//! This module defines the advertised name, service and characteristic UUIDs
//! used for provisioning over BLE. They are plain `u128` values so that this
//! crate does not need a UUID dependency; the controller converts them.

/// Local name advertised by an unprovisioned sensor
pub const DEVICE_NAME: &str = "AWAIR-R2";

/// BLE Service UUID: 2f2dfff0-2e85-649d-3545-3586428f5da3
pub const SERVICE_UUID: u128 = 0x2f2dfff0_2e85_649d_3545_3586428f5da3;

/// Notify Characteristic UUID (device -> client JSON fragments)
pub const NOTIFY_UUID: u128 = 0x2f2dfff4_2e85_649d_3545_3586428f5da3;

/// Write Characteristic UUID (client -> device JSON commands)
pub const WRITE_UUID: u128 = 0x2f2dfff5_2e85_649d_3545_3586428f5da3;

/// Number of characteristics the provisioning service exposes
pub const SERVICE_CHARACTERISTIC_COUNT: usize = 2;

/// Value of the `state` field once the sensor has joined the network
pub const WIFI_STATE_OK: &str = "OK";

/// Security mode sent when the caller does not pick one
pub const DEFAULT_WIFI_SECURITY: &str = "WPA2 AES PSK";

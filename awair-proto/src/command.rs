//! Outbound command shapes
//!
//! Every command is a JSON object with a `cmd` field. Wi-Fi credentials are
//! the one exception: they are written as a bare object and the device
//! answers with a stream of status messages instead of a single reply.

use crate::ble::DEFAULT_WIFI_SECURITY;

/// A command written to the write characteristic
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Ask for the firmware version
    GetFwVersion,
    /// Set the regulatory country (locale)
    SetCountry { country_code: String },
    /// Start the device's network search workflow
    WifiSetup,
    /// Ask the device to verify its internet connection
    ConnectionTest,
    /// Register the device with the cloud
    DeviceRegister,
    /// Install the messaging credential
    SetMqttToken { mqtt_token: String },
}

impl Command {
    pub fn set_country(country_code: impl Into<String>) -> Self {
        Self::SetCountry { country_code: country_code.into() }
    }

    pub fn set_mqtt_token(mqtt_token: impl Into<String>) -> Self {
        Self::SetMqttToken { mqtt_token: mqtt_token.into() }
    }

    /// Wire name, as it appears in the `cmd` field
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetFwVersion => "get_fw_version",
            Command::SetCountry { .. } => "set_country",
            Command::WifiSetup => "wifi_setup",
            Command::ConnectionTest => "connection_test",
            Command::DeviceRegister => "device_register",
            Command::SetMqttToken { .. } => "set_mqtt_token",
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Network credentials handed to the device during Wi-Fi setup
#[derive(serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    #[serde(rename = "SSID")]
    pub ssid: String,
    pub password: String,
    pub security: String,
}

impl WifiCredentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
            security: DEFAULT_WIFI_SECURITY.to_string(),
        }
    }

    pub fn with_security(mut self, security: impl Into<String>) -> Self {
        self.security = security.into();
        self
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

// The password never ends up in logs.
impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .field("security", &self.security)
            .finish()
    }
}

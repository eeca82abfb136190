//! BLE provisioning tool for Awair air-quality sensors
//!
//! Scans for sensors, provisions them (locale, Wi-Fi, registration, MQTT
//! token) and reads their firmware version.

use std::path::{Path, PathBuf};
use std::time::Duration;

use awair_ble_controller::{Error, ProvisionConfig, ProvisioningParams};
use awair_proto::WifiCredentials;
use awair_proto::ble::DEFAULT_WIFI_SECURITY;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "awair-ble")]
#[command(about = "BLE provisioning tool for Awair sensors")]
struct Cli {
    /// JSON config file overriding timeouts, device name and GATT UUIDs
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for Awair devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Run the full provisioning sequence on a device
    Provision {
        /// Device name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
        /// WiFi credentials file (SSID on line 1, password on line 2)
        #[arg(short, long, default_value = "wifi_credentials.txt")]
        file: PathBuf,
        /// WiFi SSID, instead of the credentials file
        #[arg(long, requires = "password")]
        ssid: Option<String>,
        /// WiFi password, instead of the credentials file
        #[arg(long, requires = "ssid")]
        password: Option<String>,
        /// WiFi security mode
        #[arg(long, default_value = DEFAULT_WIFI_SECURITY)]
        security: String,
        /// Country code to set on the device
        #[arg(long)]
        country: String,
        /// MQTT token to install
        #[arg(long)]
        mqtt_token: String,
    },
    /// Read a device's firmware version
    FwVersion {
        /// Device name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Controller(#[from] Error),
    #[error("failed to read credentials file {}: {source}", path.display())]
    CredentialsFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("missing {0} in credentials file")]
    MissingCredential(&'static str),
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = ProvisionConfig::load_or_default(cli.config.as_deref()).map_err(Error::from)?;

    match cli.command {
        Commands::Scan { duration } => {
            println!("Scanning for Awair devices ({duration} seconds)...");
            let devices = awair_ble_controller::scan(Duration::from_secs(duration), &config).await?;

            println!("\nFound {} devices:", devices.len());
            for device in devices {
                let rssi = device
                    .rssi
                    .map(|r| format!("{r} dBm"))
                    .unwrap_or_else(|| "N/A".to_string());
                let marker = if device.is_awair { " [AWAIR]" } else { "" };
                println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
            }
        }
        Commands::Provision {
            device,
            file,
            ssid,
            password,
            security,
            country,
            mqtt_token,
        } => {
            let (ssid, password) = match (ssid, password) {
                (Some(ssid), Some(password)) => (ssid, password),
                _ => read_wifi_credentials(&file)?,
            };
            println!("Provisioning device...");
            println!("  SSID: {ssid}");

            let params = ProvisioningParams {
                country_code: country,
                wifi: WifiCredentials::new(ssid, password).with_security(security),
                mqtt_token,
            };
            let session =
                awair_ble_controller::provision(&config, device.as_deref(), params).await?;

            for (step, message) in session.transcript() {
                println!("  {step}: {message}");
            }
            println!("Device provisioned!");
        }
        Commands::FwVersion { device } => {
            let reply = awair_ble_controller::fw_version(&config, device.as_deref()).await?;
            println!("{reply}");
        }
    }

    Ok(())
}

fn read_wifi_credentials(file: &Path) -> Result<(String, String), CliError> {
    let content = std::fs::read_to_string(file).map_err(|source| CliError::CredentialsFile {
        path: file.to_path_buf(),
        source,
    })?;
    parse_wifi_credentials(&content)
}

fn parse_wifi_credentials(content: &str) -> Result<(String, String), CliError> {
    let mut lines = content.lines();
    let ssid = lines.next().ok_or(CliError::MissingCredential("SSID"))?.trim().to_string();
    let password = lines
        .next()
        .ok_or(CliError::MissingCredential("password"))?
        .trim()
        .to_string();
    Ok((ssid, password))
}

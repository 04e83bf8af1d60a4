use clap::Parser;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use crate::link::AuthMode;
use crate::util::http::Uri;
use crate::util::types::{AccessToken, ClientId};

fn parse_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: u64 = s.parse()?;
    Ok(Duration::from_millis(millis))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Name of the wireless network to join
    #[arg(env = "LUMEN_WIFI_SSID", long = "wifi-ssid", value_name = "ssid")]
    pub wifi_ssid: String,

    /// Passphrase of the wireless network
    #[arg(
        env = "LUMEN_WIFI_PASSWORD",
        long = "wifi-password",
        value_name = "str",
        default_value = "",
        hide_env_values = true
    )]
    pub wifi_password: String,

    /// Weakest security accepted when associating (open, wpa2-psk, wpa3-psk)
    #[arg(
        env = "LUMEN_WIFI_AUTH_THRESHOLD",
        long = "wifi-auth-threshold",
        value_name = "mode",
        default_value = "wpa2-psk"
    )]
    pub wifi_auth_threshold: AuthMode,

    /// Wireless interface managed by wpa_supplicant
    #[arg(
        env = "LUMEN_WIFI_INTERFACE",
        long = "wifi-interface",
        value_name = "iface",
        default_value = "wlan0"
    )]
    pub wifi_interface: String,

    /// Path to the wpa_cli binary
    #[arg(
        env = "LUMEN_WPA_CLI",
        long = "wpa-cli",
        value_name = "path",
        default_value = "/usr/sbin/wpa_cli"
    )]
    pub wpa_cli: PathBuf,

    /// Number of times the connection is retried before giving up
    #[arg(
        env = "LUMEN_WIFI_MAX_RETRIES",
        long = "wifi-max-retries",
        value_name = "int",
        default_value_t = 10
    )]
    pub wifi_max_retries: u32,

    /// Time to wait for the network to be ready in milliseconds
    #[arg(
        env = "LUMEN_WIFI_CONNECT_TIMEOUT_MS",
        long = "wifi-connect-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration,
        default_value = "30000"
    )]
    pub wifi_connect_timeout: Duration,

    /// Time a single association attempt may take in milliseconds
    #[arg(
        env = "LUMEN_WIFI_ASSOCIATION_TIMEOUT_MS",
        long = "wifi-association-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration,
        default_value = "15000"
    )]
    pub wifi_association_timeout: Duration,

    /// MQTT broker URI, eg. "mqtt://demo.thingsboard.io"
    #[arg(env = "LUMEN_MQTT_ENDPOINT", long = "mqtt-endpoint", value_name = "uri")]
    pub mqtt_endpoint: Uri,

    /// Device access token used to authenticate with the broker
    #[arg(
        env = "LUMEN_MQTT_ACCESS_TOKEN",
        long = "mqtt-access-token",
        value_name = "token",
        hide_env_values = true
    )]
    pub mqtt_access_token: AccessToken,

    /// MQTT client identifier, a random one is used if not given
    #[arg(env = "LUMEN_MQTT_CLIENT_ID", long = "mqtt-client-id", value_name = "str")]
    pub mqtt_client_id: Option<ClientId>,

    /// MQTT keep-alive interval in milliseconds
    #[arg(
        env = "LUMEN_MQTT_KEEP_ALIVE_MS",
        long = "mqtt-keep-alive-ms",
        value_name = "ms",
        value_parser = parse_duration,
        default_value = "30000"
    )]
    pub mqtt_keep_alive: Duration,

    /// Topic telemetry is published on
    #[arg(
        env = "LUMEN_TELEMETRY_TOPIC",
        long = "telemetry-topic",
        value_name = "topic",
        default_value = crate::telemetry::DEFAULT_TOPIC
    )]
    pub telemetry_topic: String,

    /// Interval between telemetry samples in milliseconds
    #[arg(
        env = "LUMEN_PUBLISH_INTERVAL_MS",
        long = "publish-interval-ms",
        value_name = "ms",
        value_parser = parse_duration,
        default_value = "6000"
    )]
    pub publish_interval: Duration,

    /// IIO device the light sensor is connected to
    #[arg(
        env = "LUMEN_SENSOR_DEVICE",
        long = "sensor-device",
        value_name = "path",
        default_value = "/sys/bus/iio/devices/iio:device0"
    )]
    pub sensor_device: PathBuf,

    /// IIO voltage channel of the light sensor
    #[arg(
        env = "LUMEN_SENSOR_CHANNEL",
        long = "sensor-channel",
        value_name = "int",
        default_value_t = 6
    )]
    pub sensor_channel: u32,

    /// Raw sensor value corresponding to 100%
    #[arg(
        env = "LUMEN_SENSOR_FULL_SCALE",
        long = "sensor-full-scale",
        value_name = "int",
        default_value_t = 4095
    )]
    pub sensor_full_scale: u32,

    /// Number of raw readings averaged into one sample
    #[arg(
        env = "LUMEN_SENSOR_SAMPLES",
        long = "sensor-samples",
        value_name = "int",
        default_value_t = 10
    )]
    pub sensor_samples: u32,

    /// Delay between raw readings in milliseconds
    #[arg(
        env = "LUMEN_SENSOR_SAMPLE_SPACING_MS",
        long = "sensor-sample-spacing-ms",
        value_name = "ms",
        value_parser = parse_duration,
        default_value = "10"
    )]
    pub sensor_sample_spacing: Duration,

    /// URI of the firmware image
    #[arg(env = "LUMEN_FIRMWARE_URL", long = "firmware-url", value_name = "uri")]
    pub firmware_url: Uri,

    /// Time budget for a firmware update in milliseconds
    #[arg(
        env = "LUMEN_FIRMWARE_TIMEOUT_MS",
        long = "firmware-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration,
        default_value = "60000"
    )]
    pub firmware_timeout: Duration,

    /// Maximum number of bytes per firmware write
    #[arg(
        env = "LUMEN_FIRMWARE_BUFFER_SIZE",
        long = "firmware-buffer-size",
        value_name = "bytes",
        default_value_t = 4096
    )]
    pub firmware_buffer_size: usize,

    /// Number of times an interrupted firmware download is resumed
    #[arg(
        env = "LUMEN_FIRMWARE_MAX_RESUMES",
        long = "firmware-max-resumes",
        value_name = "int",
        default_value_t = 3
    )]
    pub firmware_max_resumes: u32,

    /// Delay between applying a firmware update and restarting in milliseconds
    #[arg(
        env = "LUMEN_FIRMWARE_SETTLE_MS",
        long = "firmware-settle-ms",
        value_name = "ms",
        value_parser = parse_duration,
        default_value = "3000"
    )]
    pub firmware_settle: Duration,

    /// Delay before checking for a firmware update in milliseconds
    #[arg(
        env = "LUMEN_FIRMWARE_PRE_UPDATE_DELAY_MS",
        long = "firmware-pre-update-delay-ms",
        value_name = "ms",
        value_parser = parse_duration,
        default_value = "2000"
    )]
    pub firmware_pre_update_delay: Duration,

    /// Allow firmware downloads over plain HTTP
    #[arg(env = "LUMEN_FIRMWARE_ALLOW_HTTP", long = "firmware-allow-http")]
    pub firmware_allow_http: bool,

    /// Delay before restarting after a connectivity failure in milliseconds
    #[arg(
        env = "LUMEN_FAILURE_RESTART_DELAY_MS",
        long = "failure-restart-delay-ms",
        value_name = "ms",
        value_parser = parse_duration,
        default_value = "5000"
    )]
    pub failure_restart_delay: Duration,
}

pub fn parse() -> Cli {
    Parser::parse()
}

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::link::{Credentials, WpaConfig};
use crate::telemetry::{MqttConnector, SamplerConfig};
use crate::util::http::Uri;
use crate::util::types::AccessToken;

#[derive(Clone, Debug)]
pub struct LinkConfig {
    pub credentials: Credentials,
    pub max_retries: u32,
    pub connect_timeout: Duration,
    pub wpa: WpaConfig,
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub endpoint: Uri,
    pub access_token: AccessToken,
    pub topic: String,
    pub interval: Duration,
    pub mqtt: MqttConnector,
    pub sensor_device: PathBuf,
    pub sensor_channel: u32,
    pub sampler: SamplerConfig,
}

#[derive(Clone, Debug)]
pub struct UpdateConfig {
    pub source: Uri,
    pub timeout: Duration,
    pub buffer_size: usize,
    pub max_resumes: u32,
    pub settle: Duration,
    pub pre_update_delay: Duration,
    pub https_only: bool,
}

/// Agent configuration, assembled once at startup
#[derive(Clone, Debug)]
pub struct Config {
    pub link: LinkConfig,
    pub telemetry: TelemetryConfig,
    pub update: UpdateConfig,
    /// Delay before restarting the device after a connectivity failure
    pub failure_restart_delay: Duration,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let link = LinkConfig {
            credentials: Credentials {
                ssid: cli.wifi_ssid,
                password: cli.wifi_password,
                auth_threshold: cli.wifi_auth_threshold,
            },
            max_retries: cli.wifi_max_retries,
            connect_timeout: cli.wifi_connect_timeout,
            wpa: WpaConfig {
                interface: cli.wifi_interface,
                wpa_cli: cli.wpa_cli,
                association_timeout: cli.wifi_association_timeout,
                ..Default::default()
            },
        };

        let telemetry = TelemetryConfig {
            endpoint: cli.mqtt_endpoint,
            access_token: cli.mqtt_access_token,
            topic: cli.telemetry_topic,
            interval: cli.publish_interval,
            mqtt: MqttConnector {
                client_id: cli.mqtt_client_id.unwrap_or_default(),
                keep_alive: cli.mqtt_keep_alive,
                ..Default::default()
            },
            sensor_device: cli.sensor_device,
            sensor_channel: cli.sensor_channel,
            sampler: SamplerConfig {
                samples: cli.sensor_samples,
                spacing: cli.sensor_sample_spacing,
                full_scale: cli.sensor_full_scale,
            },
        };

        let update = UpdateConfig {
            source: cli.firmware_url,
            timeout: cli.firmware_timeout,
            buffer_size: cli.firmware_buffer_size,
            max_resumes: cli.firmware_max_resumes,
            settle: cli.firmware_settle,
            pre_update_delay: cli.firmware_pre_update_delay,
            https_only: !cli.firmware_allow_http,
        };

        Self {
            link,
            telemetry,
            update,
            failure_restart_delay: cli.failure_restart_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_assembles_the_config_from_the_cli() {
        let cli = Cli::try_parse_from([
            "lumen",
            "--wifi-ssid",
            "SBC",
            "--wifi-password",
            "SBCwifi$",
            "--mqtt-endpoint",
            "mqtt://demo.thingsboard.io",
            "--mqtt-access-token",
            "A1_TEST_TOKEN",
            "--mqtt-client-id",
            "lumen-test",
            "--firmware-url",
            "https://updates.example.com/firmware.bin",
        ])
        .unwrap();

        let config = Config::from(cli);

        assert_eq!(config.link.credentials.ssid, "SBC");
        assert_eq!(config.link.credentials.password, "SBCwifi$");
        assert_eq!(config.link.wpa.interface, "wlan0");
        assert_eq!(config.telemetry.mqtt.client_id.as_str(), "lumen-test");
        assert_eq!(config.telemetry.mqtt.keep_alive, Duration::from_secs(30));
        assert_eq!(config.telemetry.sampler.spacing, Duration::from_millis(10));
        assert_eq!(
            config.telemetry.sensor_device,
            PathBuf::from("/sys/bus/iio/devices/iio:device0")
        );
        assert_eq!(config.telemetry.sensor_channel, 6);
        assert!(config.update.https_only);
        assert_eq!(config.failure_restart_delay, Duration::from_secs(5));
    }
}

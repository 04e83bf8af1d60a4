use std::error::Error;
use std::path::Path;

use tracing::{instrument, trace, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod agent;
mod cli;
mod config;

use lumen_link as link;
use lumen_telemetry as telemetry;
use lumen_update as update;
use lumen_util as util;

use crate::agent::{Agent, Restart};
use crate::config::Config;
use crate::link::{ConnectivityManager, WpaStation};
use crate::telemetry::{IioChannel, Sampler};
use crate::update::{Fetcher, FilePartitions, UpdateManager};
use crate::util::dirs::{firmware_dir, storage_dir};
use crate::util::http::Client;
use crate::util::store::Store;
use crate::util::system::{LogindRestart, Restart as _};

fn initialize_tracing() {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overriden using
            // RUST_LOG
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive("debug".parse().unwrap())
                    .add_directive("rumqttc=info".parse().unwrap())
                    .add_directive("hyper=error".parse().unwrap())
                    .add_directive("reqwest=info".parse().unwrap())
                    .add_directive("zbus=error".parse().unwrap()),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    initialize_tracing();

    let cli = cli::parse();
    let config = Config::from(cli);

    let restart = start_agent(config, firmware_dir(), storage_dir())
        .await
        .unwrap_or_else(Restart::startup_failed);

    warn!(reason = %restart.reason, "restarting device");
    LogindRestart.restart().await?;

    Ok(())
}

#[instrument(name = "lumen", skip_all, err)]
async fn start_agent(
    config: Config,
    firmware_dir: impl AsRef<Path>,
    storage_dir: impl AsRef<Path>,
) -> Result<Restart, Box<dyn Error>> {
    trace!(
        link = ?config.link,
        telemetry = ?config.telemetry,
        update = ?config.update,
        "using config:"
    );

    let partitions = FilePartitions::open(firmware_dir).await?;
    let client = Client::new(config.update.https_only)?;

    let (station, events) = WpaStation::start(config.link.wpa.clone());
    let connectivity = ConnectivityManager::new(station, events);

    let sensor = IioChannel::new(
        &config.telemetry.sensor_device,
        config.telemetry.sensor_channel,
    );
    let sampler = Sampler::new(sensor, config.telemetry.sampler);

    let fetcher = Fetcher::new(
        client,
        config.update.buffer_size,
        config.update.max_resumes,
    );
    let updates = UpdateManager::new(partitions, fetcher, config.update.settle);

    let connector = config.telemetry.mqtt.clone();
    let store = Store::new(storage_dir);

    let agent = Agent::new(config, store, connectivity, connector, sampler, updates);
    Ok(agent.run().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RestartReason;
    use clap::Parser;
    use tempfile::tempdir;

    #[tokio::test]
    async fn it_restarts_when_the_slots_cannot_be_read() {
        let cli = cli::Cli::try_parse_from([
            "lumen",
            "--wifi-ssid",
            "SBC",
            "--mqtt-endpoint",
            "mqtt://demo.thingsboard.io",
            "--mqtt-access-token",
            "A1_TEST_TOKEN",
            "--firmware-url",
            "https://updates.example.com/firmware.bin",
        ])
        .unwrap();

        let firmware = tempdir().unwrap();
        let storage = tempdir().unwrap();
        std::fs::write(firmware.path().join("boot.json"), "{\"boot\":").unwrap();

        let restart = start_agent(Config::from(cli), firmware.path(), storage.path())
            .await
            .unwrap_or_else(Restart::startup_failed);

        assert!(matches!(restart.reason, RestartReason::StartupFailed(_)));
    }
}

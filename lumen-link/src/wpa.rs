use std::net::{IpAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use nix::ifaddrs::getifaddrs;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, instrument, trace, warn};

use super::stack::{AuthMode, Credentials, DisconnectReason, LinkEvent, NetworkStack, StackError};

/// Settings for the wpa_supplicant backed network stack
#[derive(Debug, Clone)]
pub struct WpaConfig {
    /// Wireless interface managed by wpa_supplicant
    pub interface: String,

    /// Path to the wpa_cli binary
    pub wpa_cli: PathBuf,

    /// Interval between link state polls
    pub poll_interval: Duration,

    /// Time a connection request may take to bring the link up before it
    /// is reported as lost
    pub association_timeout: Duration,
}

impl Default for WpaConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".into(),
            wpa_cli: PathBuf::from("/usr/sbin/wpa_cli"),
            poll_interval: Duration::from_millis(500),
            association_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Error)]
enum WpaError {
    #[error("failed to run wpa_cli: {0}")]
    Io(#[from] std::io::Error),

    #[error("wpa_cli {command} failed: {output}")]
    Command { command: String, output: String },
}

/// Network stack that drives wpa_supplicant through `wpa_cli` and observes
/// the link by polling the interface state.
///
/// Requests are handed over to a background worker, results are reported on
/// the event channel returned by [`WpaStation::start`].
pub struct WpaStation {
    requests: mpsc::UnboundedSender<Credentials>,
}

impl WpaStation {
    pub fn start(config: WpaConfig) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(run(config, req_rx, event_tx));

        (Self { requests: req_tx }, event_rx)
    }
}

impl NetworkStack for WpaStation {
    fn request_connect(&self, credentials: &Credentials) -> Result<(), StackError> {
        self.requests
            .send(credentials.clone())
            .map_err(|_| StackError::Closed)
    }
}

async fn run(
    config: WpaConfig,
    mut requests: mpsc::UnboundedReceiver<Credentials>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let mut watcher = LinkWatcher::new(config.association_timeout);
    let mut configured = false;

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let updates = tokio::select! {
            req = requests.recv() => {
                let Some(credentials) = req else {
                    debug!("request channel closed, stopping");
                    break;
                };

                let res = if configured {
                    wpa_cli(&config, &["reconnect"]).await.map(|_| ())
                } else {
                    configure(&config, &credentials).await
                };

                match res {
                    Ok(()) => {
                        configured = true;
                        watcher.connect_requested(Instant::now());
                        Vec::new()
                    }
                    Err(e) => {
                        warn!("connection request failed: {e}");
                        vec![LinkEvent::LinkDown(DisconnectReason::REQUEST_FAILED)]
                    }
                }
            }
            _ = ticker.tick() => {
                let up = link_is_up(&config.interface).await;
                let address = if up { interface_address(&config.interface) } else { None };
                watcher.update(up, address, Instant::now())
            }
        };

        for event in updates {
            trace!(?event, "link event");
            if events.send(event).is_err() {
                return;
            }
        }
    }
}

/// Replace any networks known to wpa_supplicant by the given credentials
/// and associate
#[instrument(skip_all, fields(interface = %config.interface, ssid = %credentials.ssid), err)]
async fn configure(config: &WpaConfig, credentials: &Credentials) -> Result<(), WpaError> {
    wpa_cli(config, &["remove_network", "all"]).await?;
    let id = wpa_cli(config, &["add_network"]).await?;

    for args in network_commands(&id, credentials) {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        wpa_cli(config, &args).await?;
    }

    wpa_cli(config, &["reconnect"]).await?;
    Ok(())
}

/// Build the `wpa_cli` argument lists that configure and enable network `id`
fn network_commands(id: &str, credentials: &Credentials) -> Vec<Vec<String>> {
    let set = |key: &str, value: String| {
        vec![
            "set_network".to_string(),
            id.to_string(),
            key.to_string(),
            value,
        ]
    };

    let mut commands = vec![set("ssid", format!("\"{}\"", credentials.ssid))];
    match credentials.auth_threshold {
        AuthMode::Open => commands.push(set("key_mgmt", "NONE".into())),
        AuthMode::Wpa2Psk => {
            commands.push(set("key_mgmt", "WPA-PSK".into()));
            commands.push(set("psk", format!("\"{}\"", credentials.password)));
        }
        AuthMode::Wpa3Psk => {
            commands.push(set("key_mgmt", "SAE".into()));
            commands.push(set("sae_password", format!("\"{}\"", credentials.password)));
            // protected management frames are mandatory for SAE
            commands.push(set("ieee80211w", "2".into()));
        }
    }
    commands.push(vec!["enable_network".to_string(), id.to_string()]);
    commands
}

async fn wpa_cli(config: &WpaConfig, args: &[&str]) -> Result<String, WpaError> {
    let output = Command::new(&config.wpa_cli)
        .arg("-i")
        .arg(&config.interface)
        .args(args)
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || stdout.ends_with("FAIL") {
        // never echo the arguments, they may contain the passphrase
        let command = args.first().copied().unwrap_or_default().to_string();
        return Err(WpaError::Command {
            command,
            output: stdout,
        });
    }

    Ok(stdout)
}

async fn link_is_up(interface: &str) -> bool {
    let path = format!("/sys/class/net/{interface}/operstate");
    match tokio::fs::read_to_string(&path).await {
        Ok(state) => state.trim() == "up",
        Err(e) => {
            trace!("failed to read {path}: {e}");
            false
        }
    }
}

fn interface_address(interface: &str) -> Option<IpAddr> {
    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!("failed to read interface addresses: {e}");
            return None;
        }
    };

    addrs
        .filter(|ifa| ifa.interface_name == interface)
        .filter_map(|ifa| ifa.address)
        .find_map(|addr| {
            addr.as_sockaddr_in()
                .map(|sin| IpAddr::V4(*SocketAddrV4::from(*sin).ip()))
        })
}

/// Turns successive link observations into [`LinkEvent`]s
#[derive(Debug)]
struct LinkWatcher {
    up: bool,
    address: Option<IpAddr>,
    requested_at: Option<Instant>,
    association_timeout: Duration,
}

impl LinkWatcher {
    fn new(association_timeout: Duration) -> Self {
        Self {
            up: false,
            address: None,
            requested_at: None,
            association_timeout,
        }
    }

    fn connect_requested(&mut self, now: Instant) {
        self.requested_at = Some(now);
    }

    fn update(&mut self, up: bool, address: Option<IpAddr>, now: Instant) -> Vec<LinkEvent> {
        let mut events = Vec::new();

        if up && !self.up {
            self.requested_at = None;
            events.push(LinkEvent::LinkUp);
        } else if !up && self.up {
            self.address = None;
            events.push(LinkEvent::LinkDown(DisconnectReason::UNSPECIFIED));
        } else if !up
            && let Some(at) = self.requested_at
            && now.duration_since(at) >= self.association_timeout
        {
            self.requested_at = None;
            events.push(LinkEvent::LinkDown(
                DisconnectReason::CONNECT_ATTEMPT_TIMEOUT,
            ));
        }
        self.up = up;

        if up
            && let Some(addr) = address
            && self.address != Some(addr)
        {
            self.address = Some(addr);
            events.push(LinkEvent::AddressAcquired(addr));
        }

        events
    }
}

use std::fmt::Display;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::link::{ConnectivityError, ConnectivityManager, NetworkStack};
use crate::telemetry::{AnalogInput, Connector, Sampler, TelemetryPublisher};
use crate::update::{Partitions, UpdateManager, UpdateOutcome};
use crate::util::storage::{self, StorageError};
use crate::util::store::Store;

/// Why the device needs to restart
#[derive(Debug)]
pub enum RestartReason {
    StorageFailed(StorageError),
    ConnectivityFailed(ConnectivityError),
    ConnectivityLost,
    TransportFailed(String),
    UpdateApplied,
    StartupFailed(String),
}

impl Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StorageFailed(e) => write!(f, "storage initialization failed: {e}"),
            Self::ConnectivityFailed(e) => write!(f, "connectivity failed: {e}"),
            Self::ConnectivityLost => f.write_str("connectivity lost"),
            Self::TransportFailed(e) => write!(f, "transport failed: {e}"),
            Self::UpdateApplied => f.write_str("firmware update applied"),
            Self::StartupFailed(e) => write!(f, "agent failed to start: {e}"),
        }
    }
}

/// Terminal outcome of the agent. Acting on it is up to the caller.
#[derive(Debug)]
pub struct Restart {
    pub reason: RestartReason,
}

impl Restart {
    /// The agent could not be assembled
    pub fn startup_failed(err: impl Display) -> Self {
        Self {
            reason: RestartReason::StartupFailed(err.to_string()),
        }
    }
}

/// The device agent.
///
/// Brings up the network, checks for a firmware update once, and then
/// publishes a telemetry sample every interval until the device needs to
/// restart.
pub struct Agent<S, C, A, P> {
    config: Config,
    store: Store,
    connectivity: ConnectivityManager<S>,
    connector: C,
    sampler: Sampler<A>,
    updates: UpdateManager<P>,
}

impl<S, C, A, P> Agent<S, C, A, P>
where
    S: NetworkStack + Send + 'static,
    C: Connector,
    A: AnalogInput,
    P: Partitions,
{
    pub fn new(
        config: Config,
        store: Store,
        connectivity: ConnectivityManager<S>,
        connector: C,
        sampler: Sampler<A>,
        updates: UpdateManager<P>,
    ) -> Self {
        Self {
            config,
            store,
            connectivity,
            connector,
            sampler,
            updates,
        }
    }

    /// Run the agent. Only returns once the device needs to restart.
    #[instrument(name = "agent", skip_all)]
    pub async fn run(self) -> Restart {
        let Self {
            config,
            store,
            mut connectivity,
            connector,
            mut sampler,
            mut updates,
        } = self;

        match storage::init(&store).await {
            Ok(status) => info!(?status, "storage ready"),
            Err(e) => return restart_after(Duration::ZERO, RestartReason::StorageFailed(e)).await,
        }

        let mut readiness = connectivity.readiness();
        let outcome = connectivity
            .connect(
                config.link.credentials.clone(),
                config.link.max_retries,
                config.link.connect_timeout,
            )
            .await;
        if let Err(e) = outcome.into_result() {
            error!("failed to connect: {e}");
            return restart_after(
                config.failure_restart_delay,
                RestartReason::ConnectivityFailed(e),
            )
            .await;
        }

        let telemetry = &config.telemetry;
        let publisher = match connector
            .connect(&telemetry.endpoint, &telemetry.access_token)
            .await
        {
            Ok((transport, events)) => {
                TelemetryPublisher::new(transport, events, readiness.clone(), &telemetry.topic)
            }
            Err(e) => {
                error!("failed to start transport session: {e}");
                return restart_after(
                    config.failure_restart_delay,
                    RestartReason::TransportFailed(e.to_string()),
                )
                .await;
            }
        };

        tokio::time::sleep(config.update.pre_update_delay).await;
        let update = updates
            .check_and_apply(&readiness, &config.update.source, config.update.timeout)
            .await;
        if update == UpdateOutcome::Applied {
            return Restart {
                reason: RestartReason::UpdateApplied,
            };
        }

        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            info!("cycle {cycle}");

            match sampler.read().await {
                // failures are logged by the publisher and the sample dropped
                Ok(sample) => {
                    let _ = publisher.publish(&sample);
                }
                Err(e) => warn!("skipping publish: {e}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(telemetry.interval) => {}
                _ = readiness.failed() => {
                    error!("network connectivity lost permanently");
                    return restart_after(
                        config.failure_restart_delay,
                        RestartReason::ConnectivityLost,
                    )
                    .await;
                }
            }
        }
    }
}

async fn restart_after(delay: Duration, reason: RestartReason) -> Restart {
    if !delay.is_zero() {
        warn!("restarting in {delay:?}");
        tokio::time::sleep(delay).await;
    }
    Restart { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LinkConfig, TelemetryConfig, UpdateConfig};
    use crate::link::{AuthMode, Credentials, DisconnectReason, LinkEvent, StackError, WpaConfig};
    use crate::telemetry::{
        MqttConnector, QoS, SamplerConfig, Transport, TransportError, TransportEvent,
    };
    use crate::update::{Fetcher, FilePartitions, Slot};
    use crate::util::http::{Client, Uri};
    use crate::util::types::AccessToken;
    use mockito::Server;
    use std::collections::VecDeque;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tempfile::{TempDir, tempdir};
    use tokio::sync::mpsc;

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50));

    /// Network stack replying to each connection request with the next
    /// scripted batch of events
    #[derive(Clone)]
    struct ScriptedStack {
        events: mpsc::UnboundedSender<LinkEvent>,
        script: Arc<Mutex<VecDeque<Vec<LinkEvent>>>>,
        requests: Arc<Mutex<usize>>,
    }

    impl ScriptedStack {
        fn new(script: Vec<Vec<LinkEvent>>) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let stack = Self {
                events: tx,
                script: Arc::new(Mutex::new(script.into())),
                requests: Arc::new(Mutex::new(0)),
            };
            (stack, rx)
        }

        fn connects() -> Vec<LinkEvent> {
            vec![LinkEvent::LinkUp, LinkEvent::AddressAcquired(ADDR)]
        }
    }

    impl NetworkStack for ScriptedStack {
        fn request_connect(&self, _: &Credentials) -> Result<(), StackError> {
            *self.requests.lock().unwrap() += 1;
            if let Some(events) = self.script.lock().unwrap().pop_front() {
                for event in events {
                    self.events.send(event).map_err(|_| StackError::Closed)?;
                }
            }
            Ok(())
        }
    }

    type Published = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    struct FakeTransport {
        published: Published,
        // keeps the session open
        _events: mpsc::UnboundedSender<TransportEvent>,
    }

    impl Transport for FakeTransport {
        fn publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            _: QoS,
            _: bool,
        ) -> Result<(), TransportError> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        published: Published,
    }

    impl Connector for FakeConnector {
        type Transport = FakeTransport;

        async fn connect(
            &self,
            _: &Uri,
            _: &AccessToken,
        ) -> Result<(FakeTransport, mpsc::UnboundedReceiver<TransportEvent>), TransportError>
        {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(TransportEvent::SessionConnected);
            Ok((
                FakeTransport {
                    published: self.published.clone(),
                    _events: tx,
                },
                rx,
            ))
        }
    }

    struct FixedInput(u32);

    impl AnalogInput for FixedInput {
        async fn read_raw(&mut self) -> io::Result<u32> {
            Ok(self.0)
        }
    }

    fn config(source: Uri) -> Config {
        Config {
            link: LinkConfig {
                credentials: Credentials {
                    ssid: "SBC".into(),
                    password: "password".into(),
                    auth_threshold: AuthMode::Wpa2Psk,
                },
                max_retries: 2,
                connect_timeout: Duration::from_secs(30),
                wpa: WpaConfig::default(),
            },
            telemetry: TelemetryConfig {
                endpoint: "mqtt://broker.local".parse().unwrap(),
                access_token: AccessToken::from("token"),
                topic: "v1/devices/me/telemetry".into(),
                interval: Duration::from_secs(6),
                mqtt: MqttConnector::default(),
                sensor_device: PathBuf::from("/dev/null"),
                sensor_channel: 0,
                sampler: SamplerConfig::default(),
            },
            update: UpdateConfig {
                source,
                timeout: Duration::from_secs(60),
                buffer_size: 4096,
                max_resumes: 0,
                settle: Duration::from_millis(10),
                pre_update_delay: Duration::ZERO,
                https_only: false,
            },
            failure_restart_delay: Duration::from_secs(5),
        }
    }

    async fn agent(
        config: Config,
        stack: (ScriptedStack, mpsc::UnboundedReceiver<LinkEvent>),
        connector: FakeConnector,
        dir: &TempDir,
    ) -> Agent<ScriptedStack, FakeConnector, FixedInput, FilePartitions> {
        let partitions = FilePartitions::open(dir.path().join("firmware"))
            .await
            .unwrap();
        let fetcher = Fetcher::new(
            Client::new(false).unwrap(),
            config.update.buffer_size,
            config.update.max_resumes,
        );
        let updates = UpdateManager::new(partitions, fetcher, config.update.settle);
        let sampler = Sampler::new(FixedInput(2048), config.telemetry.sampler);
        let (stack, events) = stack;

        Agent::new(
            config,
            Store::new(dir.path().join("storage")),
            ConnectivityManager::new(stack, events),
            connector,
            sampler,
            updates,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn it_restarts_after_exhausting_connection_retries() {
        let dir = tempdir().unwrap();
        let down = || vec![LinkEvent::LinkDown(DisconnectReason::NO_AP_FOUND)];
        let (stack, events) = ScriptedStack::new(vec![down(), down(), down()]);
        let requests = stack.requests.clone();
        let connector = FakeConnector::default();
        let published = connector.published.clone();

        let agent = agent(
            config("http://127.0.0.1:9/firmware.bin".parse().unwrap()),
            (stack, events),
            connector,
            &dir,
        )
        .await;

        let start = tokio::time::Instant::now();
        let restart = agent.run().await;

        assert!(matches!(
            restart.reason,
            RestartReason::ConnectivityFailed(ConnectivityError::PermanentFailure)
        ));
        assert!(start.elapsed() >= Duration::from_secs(5));
        // one initial request plus one per retry
        assert_eq!(*requests.lock().unwrap(), 3);
        assert!(published.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn it_restarts_when_the_network_never_becomes_ready() {
        let dir = tempdir().unwrap();
        let agent = agent(
            config("http://127.0.0.1:9/firmware.bin".parse().unwrap()),
            ScriptedStack::new(vec![]),
            FakeConnector::default(),
            &dir,
        )
        .await;

        let restart = agent.run().await;
        assert!(matches!(
            restart.reason,
            RestartReason::ConnectivityFailed(ConnectivityError::Timeout)
        ));
    }

    #[tokio::test]
    async fn it_restarts_once_after_applying_an_update() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/firmware.bin")
            .with_status(200)
            .with_body("firmware v2")
            .expect(1)
            .create_async()
            .await;
        let source = format!("{}/firmware.bin", server.url()).parse().unwrap();

        let dir = tempdir().unwrap();
        let connector = FakeConnector::default();
        let published = connector.published.clone();
        let agent = agent(
            config(source),
            ScriptedStack::new(vec![ScriptedStack::connects()]),
            connector,
            &dir,
        )
        .await;

        let restart = agent.run().await;

        mock.assert_async().await;
        assert!(matches!(restart.reason, RestartReason::UpdateApplied));
        let partitions = FilePartitions::open(dir.path().join("firmware"))
            .await
            .unwrap();
        assert_eq!(partitions.boot_target().await.unwrap(), Slot::B);
        // the steady state is never reached
        assert!(published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn it_publishes_telemetry_until_connectivity_is_lost() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/firmware.bin")
            .with_status(404)
            .create_async()
            .await;
        let source = format!("{}/firmware.bin", server.url()).parse().unwrap();

        let dir = tempdir().unwrap();
        let (stack, events) = ScriptedStack::new(vec![ScriptedStack::connects()]);
        let link = stack.events.clone();
        let connector = FakeConnector::default();
        let published = connector.published.clone();

        let mut config = config(source);
        config.telemetry.interval = Duration::from_millis(50);
        config.failure_restart_delay = Duration::ZERO;
        let agent = agent(config, (stack, events), connector, &dir).await;
        let handle = tokio::spawn(agent.run());

        // wait for a couple of cycles
        while published.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        {
            let published = published.lock().unwrap();
            let (topic, payload) = &published[0];
            assert_eq!(topic, "v1/devices/me/telemetry");
            assert_eq!(payload, br#"{"luminosity":50.01}"#);
        }

        // the link goes away for good
        for _ in 0..3 {
            link.send(LinkEvent::LinkDown(DisconnectReason::BEACON_TIMEOUT))
                .unwrap();
        }

        let restart = handle.await.unwrap();
        assert!(matches!(restart.reason, RestartReason::ConnectivityLost));
    }
}

use std::time::Duration;

use lumen_util::http::Uri;
use lumen_util::types::{AccessToken, ClientId};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Outgoing, Packet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use super::transport::{Connector, QoS, Transport, TransportError, TransportEvent};

const MQTT_PORT: u16 = 1883;
const MQTTS_PORT: u16 = 8883;

/// Pause after a connection error before the event loop tries again
const ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Opens MQTT sessions using the access token as username, the way
/// ThingsBoard style brokers expect device credentials
#[derive(Debug, Clone)]
pub struct MqttConnector {
    pub client_id: ClientId,
    pub keep_alive: Duration,
    /// Maximum number of requests queued towards the event loop
    pub capacity: usize,
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self {
            client_id: ClientId::default(),
            keep_alive: Duration::from_secs(30),
            capacity: 10,
        }
    }
}

impl MqttConnector {
    fn options(&self, endpoint: &Uri, token: &AccessToken) -> Result<MqttOptions, TransportError> {
        let host = endpoint
            .host()
            .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.clone(), "missing host"))?;

        let (tls, default_port) = match endpoint.scheme() {
            Some("mqtt") | Some("tcp") => (false, MQTT_PORT),
            Some("mqtts") | Some("ssl") => (true, MQTTS_PORT),
            _ => {
                return Err(TransportError::InvalidEndpoint(
                    endpoint.clone(),
                    "unsupported scheme",
                ));
            }
        };
        let port = endpoint.port().unwrap_or(default_port);

        let mut options = MqttOptions::new(self.client_id.as_str(), host, port);
        options.set_keep_alive(self.keep_alive);
        options.set_credentials(token.as_str(), "");
        if tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        Ok(options)
    }
}

impl Connector for MqttConnector {
    type Transport = MqttTransport;

    #[instrument(name = "mqtt_connect", skip_all, fields(endpoint = %endpoint, client_id = %self.client_id), err)]
    async fn connect(
        &self,
        endpoint: &Uri,
        token: &AccessToken,
    ) -> Result<(MqttTransport, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let options = self.options(endpoint, token)?;
        let (client, eventloop) = AsyncClient::new(options, self.capacity);
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_event_loop(eventloop, tx));
        debug!("event loop started");

        Ok((MqttTransport { client, task }, rx))
    }
}

/// MQTT session handle. Dropping it stops the event loop.
pub struct MqttTransport {
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl Transport for MqttTransport {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, qos.into(), retain, payload)
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

async fn run_event_loop(mut eventloop: rumqttc::EventLoop, tx: mpsc::UnboundedSender<TransportEvent>) {
    let mut connected = false;
    loop {
        let events = match eventloop.poll().await {
            Ok(event) => {
                trace!(?event, "mqtt event");
                translate(&event).into_iter().collect::<Vec<_>>()
            }
            Err(e) => {
                warn!("mqtt error: {e}");
                let mut events = Vec::new();
                if connected {
                    events.push(TransportEvent::SessionDisconnected);
                }
                events.push(TransportEvent::TransportError(e.to_string()));
                events
            }
        };

        let failed = events
            .iter()
            .any(|e| matches!(e, TransportEvent::TransportError(_)));

        for event in events {
            match event {
                TransportEvent::SessionConnected => connected = true,
                TransportEvent::SessionDisconnected => connected = false,
                _ => {}
            }
            if tx.send(event).is_err() {
                return;
            }
        }

        if failed {
            tokio::time::sleep(ERROR_BACKOFF).await;
        }
    }
}

/// Map an event loop notification to a transport event, if it is relevant
fn translate(event: &Event) -> Option<TransportEvent> {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => {
            if ack.code == ConnectReturnCode::Success {
                Some(TransportEvent::SessionConnected)
            } else {
                Some(TransportEvent::TransportError(format!(
                    "connection refused: {:?}",
                    ack.code
                )))
            }
        }
        Event::Incoming(Packet::PubAck(ack)) => Some(TransportEvent::PublishAcknowledged(ack.pkid)),
        Event::Incoming(Packet::Disconnect) | Event::Outgoing(Outgoing::Disconnect) => {
            Some(TransportEvent::SessionDisconnected)
        }
        _ => None,
    }
}

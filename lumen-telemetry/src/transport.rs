use std::future::Future;

use lumen_util::http::Uri;
use lumen_util::types::AccessToken;
use thiserror::Error;
use tokio::sync::mpsc;

/// Delivery guarantee requested for a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

/// Events emitted by the pub/sub transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    SessionConnected,
    SessionDisconnected,
    PublishAcknowledged(u16),
    TransportError(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid broker endpoint {0}: {1}")]
    InvalidEndpoint(Uri, &'static str),

    #[error("transport refused the message: {0}")]
    Rejected(String),
}

/// An open pub/sub transport
pub trait Transport {
    /// Queue a message for delivery. Returns as soon as the message was
    /// handed over, delivery is reported through [`TransportEvent`]s.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;
}

/// Opens transport sessions against a broker
pub trait Connector {
    type Transport: Transport + Send + Sync + 'static;

    /// Connect to the broker at `endpoint` authenticating with `token`.
    ///
    /// The transport keeps reconnecting on its own for as long as it is
    /// alive, session changes are reported on the returned channel.
    fn connect(
        &self,
        endpoint: &Uri,
        token: &AccessToken,
    ) -> impl Future<
        Output = Result<(Self::Transport, mpsc::UnboundedReceiver<TransportEvent>), TransportError>,
    > + Send;
}

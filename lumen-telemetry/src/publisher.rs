use lumen_link::Readiness;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::sampler::TelemetrySample;
use super::session::{self, Session, SessionWriter};
use super::transport::{QoS, Transport, TransportEvent};

pub const DEFAULT_TOPIC: &str = "v1/devices/me/telemetry";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport session is not active")]
    SessionInactive,

    #[error("transport rejected the message: {0}")]
    TransportRejected(String),
}

/// Publishes telemetry samples over a transport session.
///
/// The session flag is owned by a background task consuming the transport
/// events, the publisher only reads it.
pub struct TelemetryPublisher<T> {
    transport: T,
    topic: String,
    session: Session,
    readiness: Readiness,
    handler: JoinHandle<()>,
}

impl<T: Transport> TelemetryPublisher<T> {
    pub fn new(
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        readiness: Readiness,
        topic: impl Into<String>,
    ) -> Self {
        let (writer, session) = session::channel();
        let handler = tokio::spawn(handle_events(events, writer));

        Self {
            transport,
            topic: topic.into(),
            session,
            readiness,
            handler,
        }
    }

    pub fn session(&self) -> Session {
        self.session.clone()
    }

    /// Publish a sample with at-least-once delivery.
    ///
    /// Nothing is queued or retried, a sample that cannot be published
    /// right now is lost.
    #[instrument(name = "publish", skip_all, fields(topic = %self.topic))]
    pub fn publish(&self, sample: &TelemetrySample) -> Result<(), PublishError> {
        if !self.session.is_active() || !self.readiness.is_ready() {
            warn!("not connected, skipping publish");
            return Err(PublishError::SessionInactive);
        }

        let payload = payload(sample);
        self.transport
            .publish(&self.topic, payload.clone().into_bytes(), QoS::AtLeastOnce, false)
            .map_err(|e| {
                error!("failed to publish: {e}");
                PublishError::TransportRejected(e.to_string())
            })?;

        info!("published {payload}");
        Ok(())
    }
}

impl<T> Drop for TelemetryPublisher<T> {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Format a sample as the telemetry payload
pub fn payload(sample: &TelemetrySample) -> String {
    format!("{{\"luminosity\":{:.2}}}", sample.value())
}

async fn handle_events(mut events: mpsc::UnboundedReceiver<TransportEvent>, writer: SessionWriter) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::SessionConnected => {
                writer.set_active(true);
                info!("transport session connected");
            }
            TransportEvent::SessionDisconnected => {
                if writer.set_active(false) {
                    warn!("transport session disconnected");
                }
            }
            TransportEvent::PublishAcknowledged(id) => debug!("message {id} acknowledged"),
            TransportEvent::TransportError(e) => error!("transport error: {e}"),
        }
    }

    // no more events means the transport is gone
    writer.set_active(false);
}

//! Sensor sampling and telemetry publishing.
//!
//! A [`Sampler`] turns raw analog readings into a [`TelemetrySample`], which
//! the [`TelemetryPublisher`] sends over a pub/sub [`Transport`] whenever the
//! transport session is active.

mod iio;
mod mqtt;
mod publisher;
mod sampler;
mod session;
mod transport;

pub use iio::IioChannel;
pub use mqtt::{MqttConnector, MqttTransport};
pub use publisher::{DEFAULT_TOPIC, PublishError, TelemetryPublisher, payload};
pub use sampler::{AnalogInput, SampleError, Sampler, SamplerConfig, TelemetrySample};
pub use session::{Session, SessionWriter};
pub use transport::{Connector, QoS, Transport, TransportError, TransportEvent};

use std::fmt::Display;
use std::future::Future;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument, warn};

/// Source of raw analog readings
pub trait AnalogInput {
    fn read_raw(&mut self) -> impl Future<Output = io::Result<u32>> + Send;
}

/// Smoothed sensor reading as a percentage of full scale
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct TelemetrySample(f64);

impl TelemetrySample {
    /// Create a sample from a percentage, clamped to `[0, 100]`
    pub fn new(percent: f64) -> Self {
        Self(percent.clamp(0.0, 100.0))
    }

    /// Normalize an averaged raw value against the full-scale raw range
    pub fn from_raw(raw: f64, full_scale: u32) -> Self {
        if full_scale == 0 {
            return Self(0.0);
        }
        Self::new(raw / f64::from(full_scale) * 100.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Display for TelemetrySample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}%", self.0)
    }
}

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("no raw readings could be obtained from the sensor")]
    NoReadings,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Number of raw readings averaged into one sample
    pub samples: u32,

    /// Delay between consecutive raw readings
    pub spacing: Duration,

    /// Raw value corresponding to 100%
    pub full_scale: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            samples: 10,
            spacing: Duration::from_millis(10),
            full_scale: 4095,
        }
    }
}

pub struct Sampler<A> {
    input: A,
    config: SamplerConfig,
}

impl<A: AnalogInput> Sampler<A> {
    pub fn new(input: A, config: SamplerConfig) -> Self {
        Self { input, config }
    }

    /// Take a smoothed reading.
    ///
    /// Raw values above full scale are clamped. Readings that fail are left
    /// out of the average.
    #[instrument(name = "sample", skip_all, err)]
    pub async fn read(&mut self) -> Result<TelemetrySample, SampleError> {
        let SamplerConfig {
            samples,
            spacing,
            full_scale,
        } = self.config;

        let mut total: u64 = 0;
        let mut count: u32 = 0;
        for i in 0..samples {
            if i > 0 {
                tokio::time::sleep(spacing).await;
            }
            match self.input.read_raw().await {
                Ok(raw) => {
                    total += u64::from(raw.min(full_scale));
                    count += 1;
                }
                Err(e) => warn!("failed to read sensor: {e}"),
            }
        }

        if count == 0 {
            return Err(SampleError::NoReadings);
        }

        let average = total as f64 / f64::from(count);
        let sample = TelemetrySample::from_raw(average, full_scale);
        info!(raw = average, "luminosity {sample}");

        Ok(sample)
    }
}

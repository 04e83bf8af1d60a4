use std::io;
use std::path::{Path, PathBuf};

use super::sampler::AnalogInput;

/// Analog input backed by a Linux IIO voltage channel
#[derive(Debug, Clone)]
pub struct IioChannel {
    path: PathBuf,
}

impl IioChannel {
    /// Use channel `channel` of the IIO device at `device`,
    /// e.g. `/sys/bus/iio/devices/iio:device0`
    pub fn new(device: impl AsRef<Path>, channel: u32) -> Self {
        Self {
            path: device.as_ref().join(format!("in_voltage{channel}_raw")),
        }
    }
}

impl AnalogInput for IioChannel {
    async fn read_raw(&mut self) -> io::Result<u32> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        contents
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

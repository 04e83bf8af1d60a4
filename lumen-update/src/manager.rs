use std::time::Duration;

use lumen_link::Readiness;
use lumen_util::http::Uri;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use super::fetch::{FetchError, Fetcher};
use super::partition::{PartitionError, Partitions, Slot, SlotInfo, SlotWriter};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("no network connectivity")]
    NoConnectivity,

    #[error("failed to fetch image: {0}")]
    FetchFailed(String),

    #[error("failed to write image: {0}")]
    WriteFailed(String),

    #[error("update timed out")]
    Timeout,
}

impl From<FetchError> for UpdateError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Write(e) => Self::WriteFailed(e.to_string()),
            e => Self::FetchFailed(e.to_string()),
        }
    }
}

impl From<PartitionError> for UpdateError {
    fn from(err: PartitionError) -> Self {
        Self::WriteFailed(err.to_string())
    }
}

/// Result of an update attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new image was written and selected for boot, the device needs to
    /// restart to run it
    Applied,
    NotAvailable,
    Failed(UpdateError),
}

/// Fetches firmware images into the inactive slot and selects them for boot
pub struct UpdateManager<P> {
    partitions: P,
    fetcher: Fetcher,
    settle: Duration,
}

impl<P: Partitions> UpdateManager<P> {
    /// Create a new manager. After a successful update, `settle` elapses
    /// before the outcome is reported.
    pub fn new(partitions: P, fetcher: Fetcher, settle: Duration) -> Self {
        Self {
            partitions,
            fetcher,
            settle,
        }
    }

    /// Check the source for a new image and apply it.
    ///
    /// Nothing is attempted unless the network is ready. The transfer,
    /// including flushing the image to storage, is bounded by `timeout`.
    /// Selecting the slot for boot happens after that and is never cut
    /// short, so a timed out update always leaves the boot target alone.
    #[instrument(name = "update", skip_all, fields(source = %source))]
    pub async fn check_and_apply(
        &mut self,
        readiness: &Readiness,
        source: &Uri,
        timeout: Duration,
    ) -> UpdateOutcome {
        if !readiness.is_ready() {
            warn!("network not ready, skipping update");
            return UpdateOutcome::Failed(UpdateError::NoConnectivity);
        }

        info!(running = %self.partitions.running(), "checking for firmware update");
        let res = match tokio::time::timeout(timeout, self.download(source)).await {
            Ok(res) => res,
            Err(_) => Err(UpdateError::Timeout),
        };

        let res = match res {
            Ok(Some((slot, info))) => self
                .partitions
                .mark_bootable(slot, info)
                .await
                .map(|_| true)
                .map_err(UpdateError::from),
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        };

        match res {
            Ok(true) => {
                info!("firmware update applied, restarting in {:?}", self.settle);
                tokio::time::sleep(self.settle).await;
                UpdateOutcome::Applied
            }
            Ok(false) => {
                info!("no firmware update available");
                UpdateOutcome::NotAvailable
            }
            Err(e) => {
                error!("firmware update failed: {e}");
                UpdateOutcome::Failed(e)
            }
        }
    }

    /// Download the image into the inactive slot, returning the slot and
    /// the metadata of the written image, if there was a new one
    async fn download(&mut self, source: &Uri) -> Result<Option<(Slot, SlotInfo)>, UpdateError> {
        let etag = self.partitions.running_info().and_then(|info| info.etag.clone());

        let Some(download) = self.fetcher.start(source, etag.as_deref()).await? else {
            return Ok(None);
        };
        let etag = download.etag().map(str::to_owned);

        let mut writer = self.partitions.begin().await?;
        let slot = writer.slot();
        download.copy_to(&mut writer).await?;
        let image = writer.finish().await?;
        info!(%slot, size = image.size, digest = %image.digest, "image written");

        Ok(Some((
            slot,
            SlotInfo {
                etag,
                digest: image.digest,
                size: image.size,
            },
        )))
    }
}

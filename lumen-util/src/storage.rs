//! Persistent storage initialization.
//!
//! The store is initialized once at process start. A store that cannot be
//! decoded, or that was written by a newer format, is erased and
//! re-initialized from scratch.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::store::{Store, StoreError};

const FORMAT_VERSION: u32 = 1;
const MARKER: &str = "format";

#[derive(Debug, Serialize, Deserialize)]
struct FormatMarker {
    version: u32,
}

/// Result of initializing the storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitStatus {
    /// Existing storage was found and is usable
    Ready,
    /// No storage existed, a new one was created
    Created,
    /// The existing storage was unusable and has been erased
    Erased(EraseReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EraseReason {
    Corrupted,
    NewVersionFound(u32),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to initialize storage: {0}")]
    Init(#[source] StoreError),

    #[error("failed to erase storage: {0}")]
    Erase(#[source] StoreError),
}

/// Initialize the storage, erasing it if it cannot be used
#[instrument(name = "storage", skip_all, fields(root = %store.root().display()), err)]
pub async fn init(store: &Store) -> Result<InitStatus, StorageError> {
    let status = match store.read::<_, FormatMarker>("/", MARKER).await {
        Ok(Some(marker)) if marker.version == FORMAT_VERSION => return Ok(InitStatus::Ready),
        Ok(Some(marker)) => {
            warn!(found = marker.version, "unsupported storage format");
            InitStatus::Erased(EraseReason::NewVersionFound(marker.version))
        }
        Ok(None) => InitStatus::Created,
        Err(StoreError::Serialization(e)) => {
            warn!("storage is corrupted: {e}");
            InitStatus::Erased(EraseReason::Corrupted)
        }
        Err(e) => return Err(StorageError::Init(e)),
    };

    if matches!(status, InitStatus::Erased(_)) {
        store.delete_all("/").await.map_err(StorageError::Erase)?;
        info!("storage erased");
    }

    store
        .write(
            "/",
            MARKER,
            &FormatMarker {
                version: FORMAT_VERSION,
            },
        )
        .await
        .map_err(StorageError::Init)?;

    Ok(status)
}

use std::fmt::Display;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use lumen_util::store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Firmware slot
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    #[default]
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Metadata recorded for an image once it is fully written
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    /// Entity tag the image was served with, if any
    pub etag: Option<String>,
    /// Hex encoded SHA-256 of the image
    pub digest: String,
    pub size: u64,
}

/// Summary of a fully written image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenImage {
    pub digest: String,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Streaming writer into an update slot
pub trait SlotWriter: Send {
    fn slot(&self) -> Slot;

    /// Number of bytes written so far
    fn written(&self) -> u64;

    fn write(&mut self, buf: &[u8]) -> impl Future<Output = Result<(), PartitionError>> + Send;

    /// Flush the image to storage. Only returns once the data is durable.
    fn finish(self) -> impl Future<Output = Result<WrittenImage, PartitionError>> + Send;
}

/// A/B firmware slots
pub trait Partitions {
    type Writer: SlotWriter;

    /// Slot the running firmware was booted from
    fn running(&self) -> Slot;

    /// Metadata of the running firmware image, if known
    fn running_info(&self) -> Option<&SlotInfo>;

    /// Start writing a new image into the inactive slot, discarding its
    /// previous contents
    fn begin(&mut self) -> impl Future<Output = Result<Self::Writer, PartitionError>> + Send;

    /// Select `slot` as the next boot target
    fn mark_bootable(
        &mut self,
        slot: Slot,
        info: SlotInfo,
    ) -> impl Future<Output = Result<(), PartitionError>> + Send;
}

const IMAGE: &str = "image.bin";
const BOOT: &str = "boot";
const SLOTS: &str = "slots";

#[derive(Serialize, Deserialize, Debug, Default)]
struct BootSelection {
    boot: Slot,
}

/// A/B slots kept as directories on the filesystem.
///
/// The boot target is a JSON document written atomically, so a reader
/// either sees the old or the new target but never a partial write.
#[derive(Debug)]
pub struct FilePartitions {
    root: PathBuf,
    store: Store,
    running: Slot,
    running_info: Option<SlotInfo>,
}

impl FilePartitions {
    /// Open the slots under `root`. The current boot target is taken as the
    /// running slot.
    #[instrument(name = "partitions", skip_all, fields(root = %root.as_ref().display()), err)]
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, PartitionError> {
        let root = root.as_ref().to_path_buf();
        let store = Store::new(&root);

        let running = store
            .read::<_, BootSelection>("/", BOOT)
            .await?
            .unwrap_or_default()
            .boot;
        let mut partitions = Self {
            root,
            store,
            running,
            running_info: None,
        };
        partitions.running_info = partitions.slot_info(running).await?;
        debug!(%running, "slots opened");

        Ok(partitions)
    }

    pub fn image_path(&self, slot: Slot) -> PathBuf {
        self.root.join(slot.name()).join(IMAGE)
    }

    /// Read the slot selected to boot next
    pub async fn boot_target(&self) -> Result<Slot, PartitionError> {
        let selection = self.store.read::<_, BootSelection>("/", BOOT).await?;
        Ok(selection.unwrap_or_default().boot)
    }

    /// Read the metadata of the image in `slot`, if it was ever marked bootable
    pub async fn slot_info(&self, slot: Slot) -> Result<Option<SlotInfo>, PartitionError> {
        Ok(self.store.read(SLOTS, slot.name()).await?)
    }
}

impl Partitions for FilePartitions {
    type Writer = FileSlotWriter;

    fn running(&self) -> Slot {
        self.running
    }

    fn running_info(&self) -> Option<&SlotInfo> {
        self.running_info.as_ref()
    }

    async fn begin(&mut self) -> Result<FileSlotWriter, PartitionError> {
        let slot = self.running.other();

        // the slot contents are about to change, its metadata no longer applies
        self.store.delete(SLOTS, slot.name()).await?;

        let path = self.image_path(slot);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = fs::File::create(&path).await?;
        debug!(%slot, "writing to {}", path.display());

        Ok(FileSlotWriter {
            slot,
            file,
            hasher: Sha256::new(),
            written: 0,
        })
    }

    async fn mark_bootable(&mut self, slot: Slot, info: SlotInfo) -> Result<(), PartitionError> {
        self.store.write(SLOTS, slot.name(), &info).await?;
        self.store
            .write("/", BOOT, &BootSelection { boot: slot })
            .await?;
        Ok(())
    }
}

pub struct FileSlotWriter {
    slot: Slot,
    file: fs::File,
    hasher: Sha256,
    written: u64,
}

impl SlotWriter for FileSlotWriter {
    fn slot(&self) -> Slot {
        self.slot
    }

    fn written(&self) -> u64 {
        self.written
    }

    async fn write(&mut self, buf: &[u8]) -> Result<(), PartitionError> {
        self.file.write_all(buf).await?;
        self.hasher.update(buf);
        self.written += buf.len() as u64;
        Ok(())
    }

    async fn finish(mut self) -> Result<WrittenImage, PartitionError> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        Ok(WrittenImage {
            digest: format!("{:x}", self.hasher.finalize()),
            size: self.written,
        })
    }
}

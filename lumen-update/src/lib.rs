/*
Firmware update handling.

An update is a single streamed download of a raw image into the inactive
slot of an A/B pair. The slot only becomes the boot target once the image is
fully and durably written, any failure leaves the running firmware selected.
*/

mod fetch;
mod manager;
mod partition;

pub use fetch::{Download, FetchError, Fetcher};
pub use manager::{UpdateError, UpdateManager, UpdateOutcome};
pub use partition::{
    FilePartitions, FileSlotWriter, PartitionError, Partitions, Slot, SlotInfo, SlotWriter,
    WrittenImage,
};

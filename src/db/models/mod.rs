pub mod device_event;
pub mod import_history;
pub mod master_dataset;
pub mod reading;
pub mod tombstone;
pub mod upload;

pub use device_event::{AmbiguousGroup, Confidence, DeviceEvent, DeviceEventKind, DeviceEvents};
pub use import_history::ImportHistoryEntry;
pub use master_dataset::{DatasetStats, MasterDataset};
pub use reading::{AlertRow, DateRange, Reading};
pub use tombstone::{EventTombstone, ReadingTombstone};
pub use upload::{ImportStrategy, LoadedUpload, UploadPayload, UploadRecord};

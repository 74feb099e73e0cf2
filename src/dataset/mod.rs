//! The master dataset: merge engine, persisted cache, status and cleanup.

pub mod backup;
pub mod cleanup;
pub mod commands;
pub mod merge;
pub mod status;
pub mod store;

pub use backup::{BackupExport, BackupSink, FileBackupSink};
pub use cleanup::{CleanupOptions, CleanupReport, CleanupSummary};
pub use merge::{merge_key, MergeOutcome, MergeStats};
pub use status::{derive_status, DataStatus, StatusLight};
pub use store::{DatasetState, MasterDatasetStore, UploadOptions, UploadReport, WorkdayImportReport};

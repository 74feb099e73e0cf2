pub mod commands;
pub mod legacy;
pub mod manager;
pub mod migration;

pub use legacy::LegacyStore;
pub use manager::UploadManager;
pub use migration::{migrate_legacy, MigrationFailure, MigrationReport};

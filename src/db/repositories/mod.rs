pub mod device_events;
pub mod import_history;
pub mod master_cache;
pub mod settings;
pub mod tombstones;
pub mod uploads;
pub mod workdays;

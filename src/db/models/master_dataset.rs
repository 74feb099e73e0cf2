//! Master dataset (canonical reading set + derived stats + events).

use serde::{Deserialize, Serialize};

use super::{DateRange, DeviceEvents, Reading};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStats {
    pub date_range: Option<DateRange>,
    pub total_count: usize,
}

impl DatasetStats {
    pub fn from_sorted(readings: &[Reading]) -> Self {
        Self {
            date_range: DateRange::of_sorted(readings),
            total_count: readings.len(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterDataset {
    pub all_readings: Vec<Reading>,
    pub stats: DatasetStats,
    pub events: DeviceEvents,
}

impl MasterDataset {
    pub fn new(all_readings: Vec<Reading>, events: DeviceEvents) -> Self {
        let stats = DatasetStats::from_sorted(&all_readings);
        Self {
            all_readings,
            stats,
            events,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.all_readings.is_empty()
    }
}

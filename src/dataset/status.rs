use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::config::StatusThresholds;
use crate::db::models::{DateRange, Reading};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLight {
    Green,
    Yellow,
    Red,
}

impl StatusLight {
    pub fn message(&self) -> &'static str {
        match self {
            StatusLight::Red => "No data loaded. Upload a CSV file to begin.",
            StatusLight::Yellow => "Limited recent data. Upload more CSVs for better analysis.",
            StatusLight::Green => "Ready to analyze",
        }
    }
}

/// Health of the loaded dataset. Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStatus {
    pub has_data: bool,
    pub reading_count: usize,
    pub last_14_days_count: usize,
    pub light_color: StatusLight,
    pub action_required: bool,
    pub date_range: Option<DateRange>,
    pub message: String,
}

/// Traffic-light status of a sorted reading set.
///
/// The recent window is anchored at the newest reading, not the wall clock,
/// so an old but complete export still reads green.
pub fn derive_status(readings: &[Reading], thresholds: &StatusThresholds) -> DataStatus {
    let Some(range) = DateRange::of_sorted(readings) else {
        let light = StatusLight::Red;
        return DataStatus {
            has_data: false,
            reading_count: 0,
            last_14_days_count: 0,
            light_color: light,
            action_required: true,
            date_range: None,
            message: light.message().to_string(),
        };
    };

    let cutoff = range.max - Duration::days(thresholds.window_days);
    let recent = readings
        .iter()
        .filter(|reading| reading.timestamp >= cutoff)
        .count();

    let light = if recent < thresholds.min_recent_readings {
        StatusLight::Yellow
    } else {
        StatusLight::Green
    };

    DataStatus {
        has_data: true,
        reading_count: readings.len(),
        last_14_days_count: recent,
        light_color: light,
        action_required: light != StatusLight::Green,
        date_range: Some(range),
        message: light.message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ts;

    fn readings(count: usize) -> Vec<Reading> {
        let start = ts(2025, 10, 1, 0, 0);
        (0..count)
            .map(|i| Reading::new(start + Duration::minutes(5 * i as i64), 110, "u"))
            .collect()
    }

    #[test]
    fn empty_dataset_is_red() {
        let status = derive_status(&[], &StatusThresholds::default());
        assert_eq!(status.light_color, StatusLight::Red);
        assert!(!status.has_data);
        assert!(status.action_required);
    }

    #[test]
    fn threshold_boundary() {
        let thresholds = StatusThresholds::default();

        let yellow = derive_status(&readings(1999), &thresholds);
        assert_eq!(yellow.light_color, StatusLight::Yellow);
        assert!(yellow.action_required);
        assert_eq!(yellow.last_14_days_count, 1999);

        let green = derive_status(&readings(2000), &thresholds);
        assert_eq!(green.light_color, StatusLight::Green);
        assert!(!green.action_required);
        assert_eq!(green.message, "Ready to analyze");
    }

    #[test]
    fn window_is_anchored_at_newest_reading() {
        let mut data = readings(2000);
        // one stale reading far before the window
        data.insert(0, Reading::new(ts(2024, 1, 1, 0, 0), 100, "u"));

        let status = derive_status(&data, &StatusThresholds::default());
        assert_eq!(status.reading_count, 2001);
        assert_eq!(status.last_14_days_count, 2000);
        assert_eq!(status.light_color, StatusLight::Green);
    }
}

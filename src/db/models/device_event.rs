//! Device event data models (sensor and cartridge changes).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::AlertRow;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum DeviceEventKind {
    SensorChange,
    CartridgeChange,
}

impl DeviceEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceEventKind::SensorChange => "sensor_change",
            DeviceEventKind::CartridgeChange => "cartridge_change",
        }
    }
}

/// How much evidence backed the detection of an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Confidence {
    /// The only valid alert of its kind on that date.
    High,
    /// Several alerts collapsed within the confirmation window.
    Medium,
    /// Picked by the user out of an ambiguous group.
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub timestamp: DateTime<Utc>,
    pub confidence: Confidence,
    pub source_alert_texts: Vec<String>,
    pub cluster_span_minutes: i64,
}

/// Alerts of one kind on one date that spread wider than the confirmation
/// window. Never applied until the user picks a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmbiguousGroup {
    pub kind: DeviceEventKind,
    pub date: NaiveDate,
    pub alerts: Vec<AlertRow>,
    pub span_minutes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvents {
    pub sensor_changes: Vec<DeviceEvent>,
    pub cartridge_changes: Vec<DeviceEvent>,
}

impl DeviceEvents {
    /// Split a mixed list into per-kind lists, keeping input order.
    pub fn from_events(events: Vec<DeviceEvent>) -> Self {
        let (sensor_changes, cartridge_changes) = events
            .into_iter()
            .partition(|event| event.kind == DeviceEventKind::SensorChange);
        Self {
            sensor_changes,
            cartridge_changes,
        }
    }

    pub fn len(&self) -> usize {
        self.sensor_changes.len() + self.cartridge_changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

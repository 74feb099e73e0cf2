use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

use crate::db::models::{Confidence, DateRange, DeviceEventKind, ImportStrategy};

pub fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_usize(value: i64, field: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_date(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").with_context(|| format!("failed to parse {field}"))
}

/// Rebuild a `DateRange` from its two nullable columns.
pub fn parse_date_range(min: Option<String>, max: Option<String>) -> Result<Option<DateRange>> {
    let min = parse_optional_datetime(min, "date_min")?;
    let max = parse_optional_datetime(max, "date_max")?;
    Ok(match (min, max) {
        (Some(min), Some(max)) => Some(DateRange { min, max }),
        _ => None,
    })
}

pub fn parse_strategy(value: &str) -> Result<ImportStrategy> {
    match value {
        "append" => Ok(ImportStrategy::Append),
        "replace" => Ok(ImportStrategy::Replace),
        other => Err(anyhow!("unknown import strategy {other}")),
    }
}

pub fn parse_event_kind(value: &str) -> Result<DeviceEventKind> {
    match value {
        "sensor_change" => Ok(DeviceEventKind::SensorChange),
        "cartridge_change" => Ok(DeviceEventKind::CartridgeChange),
        other => Err(anyhow!("unknown device event kind {other}")),
    }
}

pub fn parse_confidence(value: &str) -> Result<Confidence> {
    match value {
        "high" => Ok(Confidence::High),
        "medium" => Ok(Confidence::Medium),
        "low" => Ok(Confidence::Low),
        other => Err(anyhow!("unknown confidence {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn datetime_round_trips_through_rfc3339() {
        let ts = Utc.with_ymd_and_hms(2025, 10, 26, 8, 5, 0).unwrap();
        assert_eq!(parse_datetime(&ts.to_rfc3339(), "ts").unwrap(), ts);
    }

    #[test]
    fn partial_date_range_is_none() {
        let ts = Utc.with_ymd_and_hms(2025, 10, 26, 8, 5, 0).unwrap();
        assert!(parse_date_range(Some(ts.to_rfc3339()), None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_enum_values_are_errors() {
        assert!(parse_strategy("merge").is_err());
        assert!(parse_event_kind("pump").is_err());
        assert!(parse_confidence("certain").is_err());
    }
}

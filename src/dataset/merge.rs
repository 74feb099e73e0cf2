//! Deduplication and merge of reading sets.
//!
//! Readings are unique per merge key: the timestamp floored to the sampling
//! resolution. On a key collision the incoming reading wins.

use chrono::{DateTime, Duration, DurationRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::Reading;

/// Merge key of a timestamp: index of its sampling bucket since the epoch.
pub fn merge_key(timestamp: DateTime<Utc>, resolution_minutes: i64) -> i64 {
    let bucket_secs = resolution_minutes.max(1) * 60;
    timestamp.timestamp().div_euclid(bucket_secs)
}

/// Accepted timestamp window for incoming readings.
#[derive(Debug, Clone, Copy)]
pub struct TimestampBounds {
    pub earliest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
}

impl TimestampBounds {
    /// 2000-01-01 up to one day past `now`.
    pub fn relative_to(now: DateTime<Utc>) -> Self {
        let earliest = Utc
            .with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            earliest,
            latest: now + Duration::days(1),
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.earliest && timestamp <= self.latest
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    /// Keys that did not exist before.
    pub added: usize,
    /// Existing keys overwritten with a different value.
    pub replaced: usize,
    /// Existing keys overwritten with the same timestamp and value.
    pub unchanged: usize,
    /// Incoming readings rejected for out-of-bounds timestamps.
    pub dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub readings: Vec<Reading>,
    pub stats: MergeStats,
}

/// Prepare an incoming batch for merging: drop out-of-bounds rows, truncate
/// to the minute, sort by merge key and keep the later row of any duplicate
/// key. Returns the batch plus the number of dropped rows.
pub fn normalize_incoming(
    readings: Vec<Reading>,
    resolution_minutes: i64,
    bounds: TimestampBounds,
) -> (Vec<Reading>, usize) {
    let total = readings.len();
    let mut kept: Vec<Reading> = readings
        .into_iter()
        .filter(|reading| bounds.contains(reading.timestamp))
        .map(|mut reading| {
            reading.timestamp = truncate_to_minute(reading.timestamp);
            reading
        })
        .collect();
    let dropped = total - kept.len();

    // Stable sort keeps input order within a key, so the last one is the later row.
    kept.sort_by_key(|reading| merge_key(reading.timestamp, resolution_minutes));

    let mut normalized: Vec<Reading> = Vec::with_capacity(kept.len());
    for reading in kept {
        match normalized.last_mut() {
            Some(last)
                if merge_key(last.timestamp, resolution_minutes)
                    == merge_key(reading.timestamp, resolution_minutes) =>
            {
                *last = reading;
            }
            _ => normalized.push(reading),
        }
    }

    (normalized, dropped)
}

/// Merge-join two canonical sets. `incoming` must already be normalized.
/// Runs in O(n + m) and never fails.
pub fn merge_readings(
    existing: Vec<Reading>,
    incoming: Vec<Reading>,
    resolution_minutes: i64,
) -> MergeOutcome {
    let mut readings = Vec::with_capacity(existing.len() + incoming.len());
    let mut stats = MergeStats::default();

    let mut existing = existing.into_iter().peekable();
    let mut incoming = incoming.into_iter().peekable();

    loop {
        let order = match (existing.peek(), incoming.peek()) {
            (Some(old), Some(new)) => merge_key(old.timestamp, resolution_minutes)
                .cmp(&merge_key(new.timestamp, resolution_minutes)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => break,
        };

        match order {
            std::cmp::Ordering::Less => {
                if let Some(old) = existing.next() {
                    readings.push(old);
                }
            }
            std::cmp::Ordering::Greater => {
                if let Some(new) = incoming.next() {
                    stats.added += 1;
                    readings.push(new);
                }
            }
            std::cmp::Ordering::Equal => {
                if let (Some(old), Some(new)) = (existing.next(), incoming.next()) {
                    if old.timestamp == new.timestamp && old.glucose_value == new.glucose_value {
                        stats.unchanged += 1;
                    } else {
                        stats.replaced += 1;
                    }
                    readings.push(new);
                }
            }
        }
    }

    MergeOutcome { readings, stats }
}

/// Normalize `incoming` and merge it into `existing`.
pub fn merge_batch(
    existing: Vec<Reading>,
    incoming: Vec<Reading>,
    resolution_minutes: i64,
    bounds: TimestampBounds,
) -> MergeOutcome {
    let (incoming, dropped) = normalize_incoming(incoming, resolution_minutes, bounds);
    let mut outcome = merge_readings(existing, incoming, resolution_minutes);
    outcome.stats.dropped = dropped;
    outcome
}

/// Sorted ascending with no two readings sharing a merge key.
pub fn is_canonical(readings: &[Reading], resolution_minutes: i64) -> bool {
    readings.windows(2).all(|pair| {
        pair[0].timestamp < pair[1].timestamp
            && merge_key(pair[0].timestamp, resolution_minutes)
                < merge_key(pair[1].timestamp, resolution_minutes)
    })
}

pub(crate) fn truncate_to_minute(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(Duration::minutes(1))
        .unwrap_or(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ts;
    use chrono::Timelike;

    const RES: i64 = 5;

    fn bounds() -> TimestampBounds {
        TimestampBounds::relative_to(ts(2025, 11, 1, 0, 0))
    }

    fn reading(timestamp: DateTime<Utc>, value: u16, source: &str) -> Reading {
        Reading::new(timestamp, value, source)
    }

    fn series(source: &str, start_minute: u32, count: u32, value: u16) -> Vec<Reading> {
        (0..count)
            .map(|i| {
                let minute = start_minute + i * 5;
                reading(ts(2025, 10, 1, 8 + minute / 60, minute % 60), value, source)
            })
            .collect()
    }

    #[test]
    fn merge_key_floors_to_resolution() {
        assert_eq!(
            merge_key(ts(2025, 10, 1, 8, 0), RES),
            merge_key(ts(2025, 10, 1, 8, 4), RES)
        );
        assert_ne!(
            merge_key(ts(2025, 10, 1, 8, 4), RES),
            merge_key(ts(2025, 10, 1, 8, 5), RES)
        );
    }

    #[test]
    fn incoming_wins_on_collision() {
        let existing = vec![reading(ts(2025, 10, 1, 8, 0), 100, "a")];
        let incoming = vec![reading(ts(2025, 10, 1, 8, 2), 140, "b")];

        let outcome = merge_batch(existing, incoming, RES, bounds());

        assert_eq!(outcome.readings.len(), 1);
        assert_eq!(outcome.readings[0].glucose_value, 140);
        assert_eq!(outcome.readings[0].source_upload_id, "b");
        assert_eq!(outcome.stats.replaced, 1);
    }

    #[test]
    fn merging_the_same_batch_twice_is_idempotent() {
        let a = series("a", 0, 12, 100);
        let b = series("b", 30, 12, 150);

        let once = merge_batch(a, b.clone(), RES, bounds());
        let twice = merge_batch(once.readings.clone(), b, RES, bounds());

        assert_eq!(once.readings, twice.readings);
        assert_eq!(twice.stats.added, 0);
        assert_eq!(twice.stats.replaced, 0);
        assert_eq!(twice.stats.unchanged, 12);
    }

    #[test]
    fn re_merging_an_older_batch_takes_its_values_back() {
        let a = series("a", 0, 6, 100);
        let b = series("b", 0, 6, 200);

        let ab = merge_batch(Vec::new(), a.clone(), RES, bounds());
        let ab = merge_batch(ab.readings, b, RES, bounds());
        let aba = merge_batch(ab.readings, a.clone(), RES, bounds());

        assert_eq!(aba.readings, a);
        assert_eq!(aba.stats.replaced, 6);
    }

    #[test]
    fn result_is_sorted_and_unique_per_key() {
        let existing = series("a", 0, 20, 100);
        let incoming = vec![
            reading(ts(2025, 10, 1, 10, 7), 1, "b"),
            reading(ts(2025, 10, 1, 8, 3), 2, "b"),
            reading(ts(2025, 10, 1, 7, 0), 3, "b"),
            reading(ts(2025, 10, 1, 8, 31), 4, "b"),
        ];

        let outcome = merge_batch(existing, incoming, RES, bounds());
        assert!(is_canonical(&outcome.readings, RES));
        assert_eq!(outcome.readings.len(), 22);
        assert_eq!(outcome.stats.added, 2);
        assert_eq!(outcome.stats.replaced, 2);
    }

    #[test]
    fn later_row_wins_within_a_batch() {
        let incoming = vec![
            reading(ts(2025, 10, 1, 8, 1), 100, "a"),
            reading(ts(2025, 10, 1, 8, 3), 130, "a"),
        ];
        let (normalized, dropped) = normalize_incoming(incoming, RES, bounds());

        assert_eq!(dropped, 0);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].glucose_value, 130);
    }

    #[test]
    fn out_of_bounds_rows_are_dropped_and_seconds_truncated() {
        let incoming = vec![
            reading(ts(1999, 12, 31, 23, 55), 100, "a"),
            reading(ts(2025, 11, 3, 0, 0), 100, "a"),
            reading(ts(2025, 10, 1, 8, 0) + Duration::seconds(42), 120, "a"),
        ];

        let outcome = merge_batch(Vec::new(), incoming, RES, bounds());
        assert_eq!(outcome.stats.dropped, 2);
        assert_eq!(outcome.readings.len(), 1);
        assert_eq!(outcome.readings[0].timestamp.second(), 0);
    }

    #[test]
    fn empty_inputs_merge_to_empty() {
        let outcome = merge_batch(Vec::new(), Vec::new(), RES, bounds());
        assert!(outcome.readings.is_empty());
        assert_eq!(outcome.stats, MergeStats::default());
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::clustering::{config::ClusteringConfig, policy::AlertPolicy};
use crate::db::models::{AlertRow, AmbiguousGroup, Confidence, DeviceEvent, DeviceEventKind};

/// Output of one clustering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterResult {
    pub confirmed: Vec<DeviceEvent>,
    pub ambiguous: Vec<AmbiguousGroup>,
}

/// Turn raw alert rows into confirmed device events and ambiguous groups.
///
/// Rows are filtered through the policy, grouped by (kind, calendar date) and
/// each group is resolved on its own:
/// - one alert: confirmed with high confidence
/// - several alerts within the window: collapsed to the earliest (medium)
/// - several alerts spread wider: surfaced as an ambiguous group
///
/// Never fails; zero valid alerts simply yields an empty result.
pub fn cluster_alerts(
    alerts: &[AlertRow],
    policy: &AlertPolicy,
    config: &ClusteringConfig,
) -> ClusterResult {
    let mut groups: BTreeMap<(DeviceEventKind, NaiveDate), Vec<AlertRow>> = BTreeMap::new();

    for alert in alerts {
        if let Some(kind) = policy.classify(&alert.text) {
            groups
                .entry((kind, alert.timestamp.date_naive()))
                .or_default()
                .push(alert.clone());
        }
    }

    let mut result = ClusterResult::default();

    for ((kind, date), mut rows) in groups {
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.text.cmp(&b.text)));

        let (first, last) = match (rows.first(), rows.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => continue,
        };
        // Whole minutes, so the boundary matches the reported span.
        let span = last - first;

        if rows.len() == 1 {
            result.confirmed.push(event_from(kind, first, Confidence::High, &rows, span));
        } else if span.num_minutes() <= config.window_minutes {
            result.confirmed.push(event_from(kind, first, Confidence::Medium, &rows, span));
        } else {
            result.ambiguous.push(AmbiguousGroup {
                kind,
                date,
                alerts: rows,
                span_minutes: span.num_minutes(),
            });
        }
    }

    result
}

/// Confirm an ambiguous group at a user-chosen timestamp. Returns `None` when
/// the timestamp does not belong to any alert of the group.
pub fn resolve_group(group: &AmbiguousGroup, chosen: DateTime<Utc>) -> Option<DeviceEvent> {
    if !group.alerts.iter().any(|alert| alert.timestamp == chosen) {
        return None;
    }

    Some(DeviceEvent {
        kind: group.kind,
        timestamp: chosen,
        confidence: Confidence::Low,
        source_alert_texts: group.alerts.iter().map(|alert| alert.text.clone()).collect(),
        cluster_span_minutes: group.span_minutes,
    })
}

fn event_from(
    kind: DeviceEventKind,
    timestamp: DateTime<Utc>,
    confidence: Confidence,
    rows: &[AlertRow],
    span: Duration,
) -> DeviceEvent {
    DeviceEvent {
        kind,
        timestamp,
        confidence,
        source_alert_texts: rows.iter().map(|row| row.text.clone()).collect(),
        cluster_span_minutes: span.num_minutes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ts;

    fn alert(timestamp: DateTime<Utc>, text: &str) -> AlertRow {
        AlertRow {
            timestamp,
            text: text.to_string(),
        }
    }

    fn run(alerts: &[AlertRow]) -> ClusterResult {
        cluster_alerts(alerts, &AlertPolicy::default(), &ClusteringConfig::default())
    }

    #[test]
    fn no_valid_alerts_yields_nothing() {
        let result = run(&[alert(ts(2025, 10, 1, 8, 0), "LOST SENSOR SIGNAL")]);
        assert_eq!(result, ClusterResult::default());
        assert_eq!(run(&[]), ClusterResult::default());
    }

    #[test]
    fn single_alert_is_high_confidence() {
        let result = run(&[alert(ts(2025, 10, 1, 8, 0), "SENSOR CONNECTED")]);
        assert_eq!(result.confirmed.len(), 1);
        assert_eq!(result.confirmed[0].confidence, Confidence::High);
        assert_eq!(result.confirmed[0].cluster_span_minutes, 0);
    }

    #[test]
    fn alerts_within_sixty_minutes_collapse_to_earliest() {
        let result = run(&[
            alert(ts(2025, 10, 1, 9, 0), "CHANGE SENSOR"),
            alert(ts(2025, 10, 1, 8, 0), "SENSOR CONNECTED"),
        ]);

        assert!(result.ambiguous.is_empty());
        assert_eq!(result.confirmed.len(), 1);
        let event = &result.confirmed[0];
        assert_eq!(event.timestamp, ts(2025, 10, 1, 8, 0));
        assert_eq!(event.confidence, Confidence::Medium);
        assert_eq!(event.cluster_span_minutes, 60);
        assert_eq!(
            event.source_alert_texts,
            vec!["SENSOR CONNECTED".to_string(), "CHANGE SENSOR".to_string()]
        );
    }

    #[test]
    fn alerts_sixty_one_minutes_apart_are_ambiguous() {
        let result = run(&[
            alert(ts(2025, 10, 1, 8, 0), "SENSOR CONNECTED"),
            alert(ts(2025, 10, 1, 9, 1), "SENSOR CONNECTED"),
        ]);

        assert!(result.confirmed.is_empty());
        assert_eq!(result.ambiguous.len(), 1);
        assert_eq!(result.ambiguous[0].span_minutes, 61);
        assert_eq!(result.ambiguous[0].alerts.len(), 2);
    }

    #[test]
    fn boundary_is_measured_in_whole_minutes() {
        let result = run(&[
            alert(ts(2025, 10, 1, 8, 0), "SENSOR CONNECTED"),
            alert(ts(2025, 10, 1, 9, 0) + Duration::seconds(30), "SENSOR CONNECTED"),
        ]);

        assert!(result.ambiguous.is_empty());
        assert_eq!(result.confirmed.len(), 1);
        assert_eq!(result.confirmed[0].confidence, Confidence::Medium);
        assert_eq!(result.confirmed[0].cluster_span_minutes, 60);
    }

    #[test]
    fn groups_split_by_kind_and_date() {
        let result = run(&[
            alert(ts(2025, 10, 1, 8, 0), "SENSOR CONNECTED"),
            alert(ts(2025, 10, 1, 8, 10), "Rewind"),
            alert(ts(2025, 10, 2, 8, 0), "SENSOR CONNECTED"),
        ]);

        assert_eq!(result.confirmed.len(), 3);
        assert!(result
            .confirmed
            .iter()
            .all(|event| event.confidence == Confidence::High));
    }

    #[test]
    fn resolving_requires_a_member_timestamp() {
        let result = run(&[
            alert(ts(2025, 10, 1, 8, 0), "SENSOR CONNECTED"),
            alert(ts(2025, 10, 1, 12, 0), "SENSOR CONNECTED"),
        ]);
        let group = &result.ambiguous[0];

        assert!(resolve_group(group, ts(2025, 10, 1, 10, 0)).is_none());
        let event = resolve_group(group, ts(2025, 10, 1, 12, 0)).unwrap();
        assert_eq!(event.confidence, Confidence::Low);
        assert_eq!(event.timestamp, ts(2025, 10, 1, 12, 0));
    }
}

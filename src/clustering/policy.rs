use crate::db::models::DeviceEventKind;

/// Allow-list patterns for one event kind.
#[derive(Debug, Clone)]
pub struct KindRule {
    pub kind: DeviceEventKind,
    pub patterns: Vec<String>,
}

/// Which alert texts count as evidence of a device change.
///
/// Matching is a case-insensitive substring test. A text that hits the noise
/// deny-list is discarded even when it also matches an allow pattern.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    pub rules: Vec<KindRule>,
    pub noise: Vec<String>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                KindRule {
                    kind: DeviceEventKind::SensorChange,
                    patterns: vec!["SENSOR CONNECTED".into(), "CHANGE SENSOR".into()],
                },
                KindRule {
                    kind: DeviceEventKind::CartridgeChange,
                    patterns: vec!["REWIND".into()],
                },
            ],
            noise: vec![
                "LOST SENSOR SIGNAL".into(),
                "SENSOR UPDATING".into(),
                "SENSOR EXCEPTION".into(),
            ],
        }
    }
}

impl AlertPolicy {
    /// Event kind an alert text is evidence for, if any.
    pub fn classify(&self, text: &str) -> Option<DeviceEventKind> {
        let upper = text.to_uppercase();

        if self.noise.iter().any(|pattern| upper.contains(&pattern.to_uppercase())) {
            return None;
        }

        self.rules
            .iter()
            .find(|rule| {
                rule.patterns
                    .iter()
                    .any(|pattern| upper.contains(&pattern.to_uppercase()))
            })
            .map(|rule| rule.kind)
    }
}

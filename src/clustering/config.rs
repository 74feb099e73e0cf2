/// Configuration for device event clustering.
#[derive(Debug, Clone)]
pub struct ClusteringConfig {
    /// Alerts of one kind on one date whose span is within this window
    /// collapse into a single event; wider spreads need the user to decide.
    pub window_minutes: i64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self { window_minutes: 60 }
    }
}

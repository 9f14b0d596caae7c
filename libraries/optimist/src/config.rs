use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Cached values older than this are refreshed in the background on the next read.
    /// `None` keeps confirmed values until they are released.
    pub stale_after_secs: Option<i64>,
    /// Upper bound (inclusive) for synthesized demo counts.
    pub demo_ceiling: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: Some(300),
            demo_ceiling: 120,
        }
    }
}

impl StoreConfig {
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.and_then(Duration::try_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"demo_ceiling": 40}"#).unwrap();
        assert_eq!(config.demo_ceiling, 40);
        assert_eq!(config.stale_after_secs, Some(300));
    }

    #[test]
    fn test_null_disables_staleness() {
        let config: StoreConfig = serde_json::from_str(r#"{"stale_after_secs": null}"#).unwrap();
        assert_eq!(config.stale_after(), None);
    }
}

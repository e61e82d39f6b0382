//! Session configuration

use chatdeck_isolation::IsolationConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use chatdeck_tabs::DEFAULT_MODEL;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Most recently accessed tabs loaded on startup
    pub hydrate_on_start: usize,
    /// Every Nth appended message triggers an automatic checkpoint
    pub auto_checkpoint_interval: usize,
    pub max_checkpoints_per_tab: usize,
    pub default_model: String,
    /// Upper bound on one response generation
    pub response_timeout_ms: u64,
    /// Buffered events per subscriber before the slowest one starts lagging
    pub event_capacity: usize,
    pub isolation: IsolationConfig,
    pub maintenance: MaintenanceConfig,
}

impl SessionConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hydrate_on_start: 5,
            auto_checkpoint_interval: 10,
            max_checkpoints_per_tab: 50,
            default_model: DEFAULT_MODEL.to_string(),
            response_timeout_ms: 120_000,
            event_capacity: 256,
            isolation: IsolationConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
    /// Background tabs idle longer than this are suspended
    pub inactivity_threshold_secs: u64,
    /// Tabs and checkpoints older than this are archived or deleted
    pub retention_days: u32,
    /// Suspended tabs are evicted while more than this many tabs are resident
    pub max_resident_tabs: usize,
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn inactivity_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inactivity_threshold_secs as i64)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3_600,
            inactivity_threshold_secs: 7_200,
            retention_days: 30,
            max_resident_tabs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"auto_checkpoint_interval": 3, "maintenance": {"retention_days": 7}}"#,
        )
        .unwrap();

        assert_eq!(config.auto_checkpoint_interval, 3);
        assert_eq!(config.max_checkpoints_per_tab, 50);
        assert_eq!(config.maintenance.retention_days, 7);
        assert_eq!(config.maintenance.max_resident_tabs, 10);
        assert_eq!(config.isolation, IsolationConfig::default());
    }
}

//! Isolation configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Tabs that may hold a live lane at once
    pub max_sessions: usize,
    /// Bounded queue length per lane
    pub queue_capacity: usize,
    /// Blocking workers per lane
    pub workers_per_session: usize,
    /// How long an in-flight task may run after its lane is torn down
    pub drain_timeout_ms: u64,
}

impl IsolationConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            max_sessions: 5,
            queue_capacity: 64,
            workers_per_session: 2,
            drain_timeout_ms: 5_000,
        }
    }
}

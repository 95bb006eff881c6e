use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Response ordering configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderConfig {
    /// Longest time a response waits for earlier same-client responses.
    /// Zero or negative disables ordering.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i64,
}

fn default_timeout_ms() -> i64 {
    54_000
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl OrderConfig {
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms <= 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms as u64))
        }
    }
}

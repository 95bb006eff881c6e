use serde::{Deserialize, Serialize};

/// robots.txt compliance configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RobotsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// User agent matched against `User-agent:` groups and sent when fetching robots.txt
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Maximum number of hosts kept in the directive cache
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// robots.txt bodies are truncated to this many bytes before parsing
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_user_agent() -> String {
    "polite-proxy".to_string()
}

fn default_cache_size() -> usize {
    500
}

fn default_max_bytes() -> usize {
    16384
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            user_agent: default_user_agent(),
            cache_size: default_cache_size(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl RobotsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled {
            if self.user_agent.trim().is_empty() {
                return Err(anyhow::anyhow!("robots.user_agent cannot be empty"));
            }
            if self.cache_size == 0 {
                return Err(anyhow::anyhow!(
                    "robots.cache_size must be greater than 0"
                ));
            }
            if self.max_bytes == 0 {
                return Err(anyhow::anyhow!("robots.max_bytes must be greater than 0"));
            }
        }
        Ok(())
    }
}

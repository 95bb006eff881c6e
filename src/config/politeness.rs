use serde::{Deserialize, Serialize};

/// A per-domain crawl delay set by the operator.
///
/// `domain` may contain `*` wildcards and is matched case-insensitively
/// against the start of the request host, so `example.com` also covers
/// `example.com.au`. The first matching entry wins.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DomainDelayConfig {
    pub domain: String,
    /// Minimum milliseconds between two requests to the domain
    pub delay: u64,
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolitenessConfig {
    /// Delay in milliseconds applied to domains without any other entry
    #[serde(default = "default_delay")]
    pub default_delay: u64,
    /// How often expired cooldown records are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub domains: Vec<DomainDelayConfig>,
}

fn default_delay() -> u64 {
    1000
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            default_delay: default_delay(),
            sweep_interval_secs: default_sweep_interval(),
            domains: Vec::new(),
        }
    }
}

impl PolitenessConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "politeness.sweep_interval_secs must be greater than 0"
            ));
        }

        for entry in &self.domains {
            if entry.domain.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "politeness.domains entries need a non-empty domain"
                ));
            }
        }

        Ok(())
    }
}

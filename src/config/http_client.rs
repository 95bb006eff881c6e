use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MAX_IDLE_PER_HOST: usize = 32;
const DEFAULT_IDLE_SECS: u64 = 90;
const DEFAULT_CONNECT_SECS: u64 = 10;
const DEFAULT_REQUEST_SECS: u64 = 60;

/// Upstream transport tunables. A reload rebuilds the transport from these.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpClientConfig {
    pub pool_max_idle_per_host: Option<usize>,
    /// Seconds an idle pooled connection is kept
    pub pool_idle_timeout: Option<u64>,
    /// Seconds, TCP connect only
    pub connect_timeout: Option<u64>,
    /// Seconds until upstream response headers arrive
    pub request_timeout: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: Some(DEFAULT_MAX_IDLE_PER_HOST),
            pool_idle_timeout: Some(DEFAULT_IDLE_SECS),
            connect_timeout: Some(DEFAULT_CONNECT_SECS),
            request_timeout: Some(DEFAULT_REQUEST_SECS),
        }
    }
}

impl HttpClientConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool_max_idle_per_host == Some(0) {
            return Err(anyhow::anyhow!(
                "http_client.pool_max_idle_per_host must be greater than 0"
            ));
        }

        let timeouts = [
            ("pool_idle_timeout", self.pool_idle_timeout),
            ("connect_timeout", self.connect_timeout),
            ("request_timeout", self.request_timeout),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == Some(0)) {
            return Err(anyhow::anyhow!(
                "http_client.{} must be greater than 0 seconds",
                name
            ));
        }

        Ok(())
    }

    pub fn get_pool_max_idle_per_host(&self) -> usize {
        self.pool_max_idle_per_host
            .unwrap_or(DEFAULT_MAX_IDLE_PER_HOST)
    }

    pub fn get_pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout.unwrap_or(DEFAULT_IDLE_SECS))
    }

    pub fn get_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_SECS))
    }

    pub fn get_request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.unwrap_or(DEFAULT_REQUEST_SECS))
    }
}

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address the crawler-facing proxy listens on
    pub bind: SocketAddr,
    /// Optional address for the batch politeness-check service
    #[serde(default)]
    pub service_bind: Option<SocketAddr>,
    /// Extra addresses treated as "this proxy" by the self-request guard
    #[serde(default)]
    pub local_addresses: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            service_bind: None,
            local_addresses: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(service_bind) = self.service_bind {
            if service_bind == self.bind {
                return Err(anyhow::anyhow!(
                    "server.service_bind must differ from server.bind ({})",
                    self.bind
                ));
            }
        }
        Ok(())
    }

    /// Addresses that identify this proxy, including the bind address when it is specific
    pub fn own_addresses(&self) -> Vec<IpAddr> {
        let mut addrs = self.local_addresses.clone();
        if !self.bind.ip().is_unspecified() && !addrs.contains(&self.bind.ip()) {
            addrs.push(self.bind.ip());
        }
        addrs
    }
}

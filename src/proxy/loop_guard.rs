use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::debug;
use url::{Host, Url};

use crate::error::{ProxyError, ProxyResult};

/// Host name resolution used by the self-request guard
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> ProxyResult<Vec<IpAddr>>;
}

/// System resolver via `tokio::net::lookup_host`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioResolver;

#[async_trait]
impl HostResolver for TokioResolver {
    async fn resolve(&self, host: &str, port: u16) -> ProxyResult<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ProxyError::network(format!("resolving {}: {}", host, e)))?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Fixed host table; unknown hosts fail to resolve
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, addrs: Vec<IpAddr>) -> Self {
        self.hosts.insert(host.to_ascii_lowercase(), addrs);
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> ProxyResult<Vec<IpAddr>> {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ProxyError::network(format!("unknown host {}", host)))
    }
}

/// Detects requests that would loop back into the proxy itself
pub struct SelfRequestGuard {
    own: Vec<IpAddr>,
    resolver: Box<dyn HostResolver>,
}

impl SelfRequestGuard {
    pub fn new(own: Vec<IpAddr>, resolver: Box<dyn HostResolver>) -> Self {
        Self { own, resolver }
    }

    fn is_own(&self, ip: &IpAddr) -> bool {
        ip.is_loopback() || self.own.contains(ip)
    }

    /// True when the target host resolves to loopback or one of our addresses.
    /// Resolution failures count as not a self-request.
    pub async fn is_self_request(&self, target: &Url) -> bool {
        let port = target.port_or_known_default().unwrap_or(80);
        let addrs = match target.host() {
            Some(Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
            Some(Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
            Some(Host::Domain(domain)) => match self.resolver.resolve(domain, port).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    debug!("Self-request check could not resolve {}: {}", domain, e);
                    return false;
                }
            },
            None => return false,
        };
        addrs.iter().any(|ip| self.is_own(ip))
    }
}

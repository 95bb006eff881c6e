use hyper::body::HttpBody;
use hyper::header::{CONTENT_TYPE, USER_AGENT};
use hyper::{Body, Request, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::directives::HostDirectives;
use super::parser;
use crate::config::RobotsConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::politeness::DomainDelayTable;
use crate::proxy::http_client::Transport;

struct CachedDirectives {
    directives: Arc<HostDirectives>,
    /// Agent the directives were parsed for
    agent: String,
    last_accessed: Instant,
}

/// Fetches, caches and evaluates robots.txt per host
pub struct RobotsServer {
    config: RwLock<Arc<RobotsConfig>>,
    transport: Arc<dyn Transport>,
    delays: Arc<DomainDelayTable>,
    cache: Mutex<HashMap<String, CachedDirectives>>,
}

impl RobotsServer {
    pub fn new(
        config: RobotsConfig,
        transport: Arc<dyn Transport>,
        delays: Arc<DomainDelayTable>,
    ) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            transport,
            delays,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> Arc<RobotsConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_enabled(&self) -> bool {
        self.config().enabled
    }

    /// Swap in a reloaded configuration. Hosts parsed for another agent are
    /// refetched on their next check.
    pub fn reconfigure(&self, config: RobotsConfig) {
        let mut current = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if current.user_agent != config.user_agent {
            info!(
                "robots.txt agent changed from {} to {}",
                current.user_agent, config.user_agent
            );
        }
        *current = Arc::new(config);
    }

    /// Whether the configured agent may fetch `url`. Fails open.
    pub async fn allows(&self, url: &Url) -> bool {
        let config = self.config();
        if !config.enabled {
            return true;
        }

        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            warn!("URL without host passed to robots check, allowing: {}", url);
            return true;
        };

        let directives = match self.cached(&host, &config.user_agent).await {
            Some(directives) => directives,
            None => self.fetch_directives(url, &host, &config).await,
        };

        let allowed = directives.allows(url.path());
        debug!(
            "robots.txt for {} {} {}",
            host,
            if allowed { "allows" } else { "disallows" },
            url.path()
        );
        allowed
    }

    /// Fresh cached directives for `host`, touching the access time
    async fn cached(&self, host: &str, agent: &str) -> Option<Arc<HostDirectives>> {
        let mut cache = self.cache.lock().await;
        let entry = cache.get(host)?;
        if entry.directives.needs_refetch() || entry.agent != agent {
            debug!("robots.txt for {} is stale, refetching", host);
            cache.remove(host);
            return None;
        }

        let entry = cache.get_mut(host)?;
        entry.last_accessed = Instant::now();
        Some(Arc::clone(&entry.directives))
    }

    async fn fetch_directives(
        &self,
        url: &Url,
        host: &str,
        config: &RobotsConfig,
    ) -> Arc<HostDirectives> {
        let agent = config.user_agent.as_str();
        let directives = match robots_url(url) {
            Ok(robots_url) => match self.download(&robots_url, config).await {
                Ok(Some(content)) => {
                    record_fetch("parsed");
                    let directives = parser::parse(&content, agent);
                    if let Some(delay_ms) = directives.crawl_delay_ms() {
                        info!("robots.txt for {} sets crawl-delay {}ms", host, delay_ms);
                        self.delays.update_robots_delay(host, delay_ms);
                    }
                    directives
                }
                Ok(None) => {
                    record_fetch("empty");
                    HostDirectives::new(agent)
                }
                Err(e) => {
                    record_fetch("error");
                    warn!("Error occurred while fetching {}: {}", robots_url, e);
                    HostDirectives::new(agent)
                }
            },
            Err(e) => {
                warn!("Cannot build robots.txt URL for {}: {}", url, e);
                HostDirectives::new(agent)
            }
        };

        // An empty set is cached too so the fetch time is tracked
        let directives = Arc::new(directives);
        self.store(host, agent, Arc::clone(&directives), config.cache_size)
            .await;
        directives
    }

    /// Body of a readable robots.txt, `None` when the response is not one
    async fn download(
        &self,
        robots_url: &Url,
        config: &RobotsConfig,
    ) -> ProxyResult<Option<String>> {
        let max_bytes = config.max_bytes;
        let req = Request::get(robots_url.as_str())
            .header(USER_AGENT, config.user_agent.as_str())
            .body(Body::empty())?;

        let resp = self.transport.send(req).await?;
        if resp.status() != StatusCode::OK {
            debug!(
                "Can't read {} as its status code is {}",
                robots_url,
                resp.status()
            );
            return Ok(None);
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.contains("text") && !content_type.contains("html") {
            warn!(
                "Can't read {} as it is not plain text, content type: {}",
                robots_url, content_type
            );
            return Ok(None);
        }

        let mut body = resp.into_body();
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = body.data().await {
            let chunk = chunk.map_err(|e| ProxyError::robots(e.to_string()))?;
            let room = max_bytes.saturating_sub(bytes.len());
            bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if bytes.len() >= max_bytes {
                debug!("Truncated {} to {} bytes", robots_url, max_bytes);
                break;
            }
        }

        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn store(
        &self,
        host: &str,
        agent: &str,
        directives: Arc<HostDirectives>,
        capacity: usize,
    ) {
        let mut cache = self.cache.lock().await;
        cache.remove(host);
        while !cache.is_empty() && cache.len() >= capacity {
            let oldest = cache
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(host, _)| host.clone());
            let Some(oldest) = oldest else { break };
            debug!("Evicting robots.txt directives for {}", oldest);
            cache.remove(&oldest);
        }
        cache.insert(
            host.to_string(),
            CachedDirectives {
                directives,
                agent: agent.to_string(),
                last_accessed: Instant::now(),
            },
        );
    }

    /// Number of hosts with cached directives
    pub async fn cached_hosts(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_cached(&self, host: &str) -> bool {
        self.cache
            .lock()
            .await
            .contains_key(&host.to_ascii_lowercase())
    }
}

fn record_fetch(outcome: &'static str) {
    metrics::counter!(
        "polite_proxy_robots_fetch_total",
        &[("outcome", String::from(outcome))]
    )
    .increment(1);
}

/// `scheme://host[:port]/robots.txt`, default ports omitted
pub fn robots_url(url: &Url) -> ProxyResult<Url> {
    let host = url
        .host_str()
        .ok_or_else(|| ProxyError::invalid_url(url.as_str(), "missing host"))?
        .to_ascii_lowercase();
    let port = match url.port() {
        Some(port) => format!(":{}", port),
        None => String::new(),
    };
    let robots = format!("{}://{}{}/robots.txt", url.scheme(), host, port);
    Url::parse(&robots).map_err(|e| ProxyError::invalid_url(robots, e.to_string()))
}

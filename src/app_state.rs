use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{CacheHandler, ResponseStore};
use crate::config::{CacheConfig, Config, LoggingConfig, ServerConfig};
use crate::error::ProxyResult;
use crate::order::OrderEnforcer;
use crate::politeness::{DomainDelayTable, PolitenessLimiter};
use crate::proxy::http_client::{HyperTransport, SharedTransport, Transport};
use crate::proxy::loop_guard::{HostResolver, SelfRequestGuard, TokioResolver};
use crate::robots::RobotsServer;

/// Cache TTL cleanup cadence
const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Settings only read while starting up
#[derive(Debug, Clone, PartialEq)]
struct StartupSettings {
    server: ServerConfig,
    cache: CacheConfig,
    logging: LoggingConfig,
}

impl StartupSettings {
    fn of(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            // The toggle is reloadable, the limits are not
            cache: CacheConfig {
                enabled: true,
                ..config.cache.clone()
            },
            logging: config.logging.clone(),
        }
    }

    /// Names of the sections whose changes wait for a restart
    fn changed_sections(&self, other: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.server != other.server {
            changed.push("server");
        }
        if self.cache != other.cache {
            changed.push("cache limits");
        }
        if self.logging != other.logging {
            changed.push("logging");
        }
        changed
    }
}

/// Every store the proxy pipeline and the batch service share.
///
/// Built once from configuration. A reload replaces the transport, the
/// configured delay table, the robots settings, the order timeout and the
/// cache toggle.
#[derive(Clone)]
pub struct AppState {
    pub delays: Arc<DomainDelayTable>,
    pub limiter: Arc<PolitenessLimiter>,
    pub transport: Arc<SharedTransport>,
    pub robots: Arc<RobotsServer>,
    pub cache: CacheHandler,
    pub order: Arc<OrderEnforcer>,
    pub guard: Arc<SelfRequestGuard>,
    startup: Arc<StartupSettings>,
}

impl AppState {
    /// Production wiring: hyper transport and the system resolver
    pub fn from_config(config: &Config) -> ProxyResult<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HyperTransport::new(&config.http_client));
        Self::with_parts(config, transport, Box::new(TokioResolver))
    }

    pub fn with_parts(
        config: &Config,
        transport: Arc<dyn Transport>,
        resolver: Box<dyn HostResolver>,
    ) -> ProxyResult<Self> {
        let delays = Arc::new(DomainDelayTable::from_config(&config.politeness)?);
        let limiter = Arc::new(PolitenessLimiter::new(Arc::clone(&delays)));
        let transport = Arc::new(SharedTransport::new(transport));

        let robots_transport: Arc<dyn Transport> = transport.clone();
        let robots = Arc::new(RobotsServer::new(
            config.robots.clone(),
            robots_transport,
            Arc::clone(&delays),
        ));

        let store = Arc::new(ResponseStore::new(&config.cache));
        let cache = CacheHandler::new(store, config.cache.enabled);
        let order = Arc::new(OrderEnforcer::new(config.order.timeout()));
        let guard = Arc::new(SelfRequestGuard::new(
            config.server.own_addresses(),
            resolver,
        ));

        Ok(Self {
            delays,
            limiter,
            transport,
            robots,
            cache,
            order,
            guard,
            startup: Arc::new(StartupSettings::of(config)),
        })
    }

    /// Start the limiter sweep and cache cleanup tasks
    pub fn spawn_background_tasks(&self, config: &Config) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self
            .limiter
            .spawn_sweeper(Duration::from_secs(config.politeness.sweep_interval_secs))];
        if self.cache.is_enabled() {
            handles.push(self.cache.store().spawn_cleanup(CACHE_CLEANUP_INTERVAL));
        }
        handles
    }

    /// Full replace of the reloadable parts after a configuration change.
    /// Returns the sections left at their startup values.
    pub fn apply_reload(&self, config: &Config) -> ProxyResult<Vec<&'static str>> {
        self.apply_reload_with(config, Arc::new(HyperTransport::new(&config.http_client)))
    }

    pub fn apply_reload_with(
        &self,
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> ProxyResult<Vec<&'static str>> {
        self.delays.reload(&config.politeness)?;
        self.transport.replace(transport);
        self.robots.reconfigure(config.robots.clone());
        self.order.set_timeout(config.order.timeout());
        self.cache.set_enabled(config.cache.enabled);
        info!("Reloaded politeness, robots, order, cache toggle and HTTP transport");

        let pending = self.startup.changed_sections(&StartupSettings::of(config));
        if !pending.is_empty() {
            warn!(
                "Changes to {} need a restart to take effect",
                pending.join(", ")
            );
        }
        Ok(pending)
    }
}

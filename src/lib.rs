//! # Polite Proxy - 面向爬虫的礼貌性缓存代理
//!
//! Polite Proxy 位于爬虫的出站流量之前，替每个爬虫客户端统一维护按域名的礼貌性状态：
//! 遵守 robots.txt，强制执行抓取间隔，并在缓存仍然新鲜时直接返回已抓取的内容。
//!
//! ## 核心功能
//!
//! - **robots.txt 合规**: 按主机抓取、解析并缓存规则，按 User-agent 优先级匹配
//! - **抓取间隔**: 运营配置与 `Crawl-delay` 合并后的按域名冷却
//! - **响应缓存**: 按 (URL, Content-Type) 存储并遵循请求侧 `Cache-Control`
//! - **响应顺序**: 同一客户端的并发请求按到达顺序返回
//! - **批量检查服务**: 不转发，仅返回一组 URL 的礼貌性判断
//! - **配置热重载**: 域名延迟表与上游客户端整体替换
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use polite_proxy::{app_state::AppState, config::Config, proxy::ProxyServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file_with_env("config.toml").await?;
//!     let state = AppState::from_config(&config)?;
//!     let server = ProxyServer::new(config.server.bind, state);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod app_state;
pub mod cache;
pub mod config;
pub mod error;
pub mod order;
pub mod politeness;
pub mod proxy;
pub mod robots;
pub mod service;

// Re-export commonly used types
pub use app_state::AppState;
pub use cache::{CacheEntry, CacheHandler, CacheKey, CacheStats, ResponseStore};
pub use error::{ProxyError, ProxyResult};
pub use order::{OrderEnforcer, OrderSlot};
pub use politeness::{DomainDelayTable, PolitenessEntry, PolitenessLimiter};
pub use proxy::{ProxyPipeline, ProxyServer};
pub use robots::RobotsServer;
pub use service::{PolitenessService, UrlPoliteness};

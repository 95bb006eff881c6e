//! # 抓取间隔（礼貌性）模块
//!
//! - `delays`: 域名延迟表，合并运营配置与 robots.txt 中发现的 `Crawl-delay`
//! - `limiter`: 按域名的冷却记录，决定请求是否需要等待
//! - `entry`: 单个域名的延迟记录

pub mod delays;
pub mod entry;
pub mod limiter;

pub use delays::DomainDelayTable;
pub use entry::PolitenessEntry;
pub use limiter::PolitenessLimiter;

//! # robots.txt 合规模块
//!
//! 按主机抓取、解析并缓存 robots.txt，回答某个路径是否允许访问，
//! 并把发现的 `Crawl-delay` 报告给抓取间隔表。
//!
//! - `rule`: 把 robots.txt 路径模式编译为正则
//! - `directives`: 每个主机的规则组及优先级计算
//! - `parser`: robots.txt 文本解析
//! - `server`: 抓取、缓存与容量淘汰

pub mod directives;
pub mod parser;
pub mod rule;
pub mod server;

pub use directives::{HostDirectives, UserAgentDirectives};
pub use rule::{Rule, RuleKind};
pub use server::RobotsServer;

/// Verdict of a rule group for one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Disallowed,
    /// No rule in the group matched
    Undefined,
}

//! # 配置管理模块
//!
//! 本模块提供了礼貌代理的完整配置管理功能，包括：
//!
//! - TOML配置文件解析和验证
//! - 环境变量替换和扩展
//! - 配置热重载支持（域名延迟表与上游客户端整体替换）
//!
//! ## 配置结构
//!
//! - `server`: 监听地址、批量检查服务地址、本机地址列表
//! - `politeness`: 默认抓取间隔与按域名配置的延迟
//! - `robots`: robots.txt 合规检查
//! - `cache`: HTTP 响应缓存
//! - `order`: 同一客户端响应顺序保证
//! - `http_client`: 上游HTTP客户端连接池配置
//! - `logging`: 日志级别与格式
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use polite_proxy::config::Config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file_with_env("config.toml").await?;
//! println!("代理监听地址: {}", config.server.bind);
//! # Ok(())
//! # }
//! ```

pub mod cache; // 响应缓存配置
pub mod http_client; // HTTP客户端配置
pub mod logging; // 日志配置
pub mod manager; // 配置管理器和热重载
pub mod order; // 响应顺序配置
pub mod politeness; // 抓取间隔配置
pub mod robots; // robots.txt 配置
pub mod server; // 监听配置

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use tracing::{info, warn};

pub use cache::CacheConfig;
pub use http_client::HttpClientConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use manager::ConfigManager;
pub use order::OrderConfig;
pub use politeness::{DomainDelayConfig, PolitenessConfig};
pub use robots::RobotsConfig;
pub use server::ServerConfig;

/// 礼貌代理主配置结构
///
/// 除 `server` 外的所有段落均可省略，省略时使用默认值。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// 监听配置
    pub server: ServerConfig,
    /// 抓取间隔配置
    #[serde(default)]
    pub politeness: PolitenessConfig,
    /// robots.txt 合规配置
    #[serde(default)]
    pub robots: RobotsConfig,
    /// HTTP响应缓存配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 响应顺序配置
    #[serde(default)]
    pub order: OrderConfig,
    /// 上游HTTP客户端连接池配置
    #[serde(default)]
    pub http_client: HttpClientConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            politeness: PolitenessConfig::default(),
            robots: RobotsConfig::default(),
            cache: CacheConfig::default(),
            order: OrderConfig::default(),
            http_client: HttpClientConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable expansion
    pub async fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let config = Self::from_toml_str(&content)?;
        info!("Configuration loaded from {:?}", path.as_ref());
        Ok(config)
    }

    /// Parse configuration text, expanding environment variables first
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded_content = expand_env_vars(content);

        let mut config: Config = toml::from_str(&expanded_content)?;

        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Apply default values where needed
    fn apply_defaults(&mut self) {
        // Normalise configured domains; matching is case-insensitive anyway
        for entry in &mut self.politeness.domains {
            entry.domain = entry.domain.trim().to_ascii_lowercase();
        }

        if !self.robots.enabled && self.robots.user_agent.trim().is_empty() {
            self.robots.user_agent = RobotsConfig::default().user_agent;
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.politeness.validate()?;
        self.robots.validate()?;
        self.cache.validate()?;
        self.http_client.validate()?;
        self.logging.validate()?;

        self.validate_cross_dependencies()?;

        Ok(())
    }

    /// Validate cross-dependencies between different configuration sections
    fn validate_cross_dependencies(&self) -> Result<()> {
        let request_timeout = self.http_client.get_request_timeout();
        if let Some(order_timeout) = self.order.timeout() {
            if order_timeout < request_timeout {
                warn!(
                    "order.timeout_ms ({:?}) is shorter than the upstream request timeout ({:?}); \
                    slow responses may be released out of order",
                    order_timeout, request_timeout
                );
            }
        }

        if !self.cache.enabled && self.cache.snapshot_path.is_some() {
            warn!("cache.snapshot_path is set but the cache is disabled; no snapshot will be written");
        }

        Ok(())
    }
}

/// Expand environment variables in configuration content
/// Supports ${VAR} and ${VAR:-default} syntax
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_expr = &result[start + 2..start + end];
            let replacement = if let Some(default_pos) = var_expr.find(":-") {
                let var_name = &var_expr[..default_pos];
                let default_value = &var_expr[default_pos + 2..];
                env::var(var_name).unwrap_or_else(|_| default_value.to_string())
            } else {
                env::var(var_expr).unwrap_or_else(|_| {
                    warn!(
                        "Environment variable '{}' not found, using empty string",
                        var_expr
                    );
                    String::new()
                })
            };

            result.replace_range(start..start + end + 1, &replacement);
        } else {
            break; // Malformed ${VAR expression
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper function to create a temporary config file
    fn create_temp_config_file(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[tokio::test]
    async fn test_basic_config_loading() {
        let config_content = r#"
[server]
bind = "127.0.0.1:8080"
service_bind = "127.0.0.1:8081"
local_addresses = ["10.0.0.5"]

[politeness]
default_delay = 2000

[[politeness.domains]]
domain = "Slow.Example"
delay = 5000

[[politeness.domains]]
domain = "*.gov"
delay = 3000

[robots]
user_agent = "mybot"
cache_size = 100

[cache]
max_entries = 10
snapshot_path = "/tmp/polite-cache.json"

[order]
timeout_ms = 0

[logging]
level = "debug"
format = "json"
"#;

        let temp_file = create_temp_config_file(config_content);
        let config = Config::from_file_with_env(temp_file.path()).await.unwrap();

        assert_eq!(config.server.bind.to_string(), "127.0.0.1:8080");
        assert_eq!(
            config.server.service_bind.map(|a| a.to_string()),
            Some("127.0.0.1:8081".to_string())
        );
        assert_eq!(config.politeness.default_delay, 2000);
        assert_eq!(config.politeness.domains.len(), 2);
        assert_eq!(config.politeness.domains[0].domain, "slow.example");
        assert_eq!(config.politeness.domains[0].delay, 5000);
        assert_eq!(config.robots.user_agent, "mybot");
        assert_eq!(config.robots.cache_size, 100);
        assert_eq!(config.robots.max_bytes, 16384);
        assert_eq!(config.cache.max_entries, 10);
        assert!(config.order.timeout().is_none());
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[tokio::test]
    async fn test_config_defaults() {
        let temp_file = create_temp_config_file("[server]\nbind = \"127.0.0.1:9000\"\n");
        let config = Config::from_file_with_env(temp_file.path()).await.unwrap();

        assert_eq!(config.politeness.default_delay, 1000);
        assert!(config.robots.enabled);
        assert_eq!(config.robots.user_agent, "polite-proxy");
        assert_eq!(config.robots.cache_size, 500);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl_secs, 30 * 24 * 3600);
        assert_eq!(
            config.order.timeout(),
            Some(std::time::Duration::from_millis(54_000))
        );
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[tokio::test]
    async fn test_env_var_expansion() {
        env::set_var("POLITE_TEST_HOST", "127.0.0.1");

        let config_content = r#"
[server]
bind = "${POLITE_TEST_HOST:-localhost}:${POLITE_TEST_PORT:-8088}"

[robots]
user_agent = "${POLITE_TEST_AGENT:-envbot}"
"#;

        let temp_file = create_temp_config_file(config_content);
        let config = Config::from_file_with_env(temp_file.path()).await.unwrap();

        assert_eq!(config.server.bind.to_string(), "127.0.0.1:8088");
        assert_eq!(config.robots.user_agent, "envbot");

        env::remove_var("POLITE_TEST_HOST");
    }

    #[test]
    fn test_expand_env_vars() {
        env::set_var("POLITE_TEST_VAR", "test_value");

        let content = "host = \"${POLITE_TEST_VAR}\"";
        let result = expand_env_vars(content);
        assert_eq!(result, "host = \"test_value\"");

        let content_with_default = "host = \"${POLITE_MISSING_VAR:-default_value}\"";
        let result = expand_env_vars(content_with_default);
        assert_eq!(result, "host = \"default_value\"");

        env::remove_var("POLITE_TEST_VAR");
    }

    #[test]
    fn test_config_validation() {
        let zero_sweep = r#"
[server]
bind = "127.0.0.1:8080"

[politeness]
sweep_interval_secs = 0
"#;
        assert!(Config::from_toml_str(zero_sweep).is_err());

        let same_bind = r#"
[server]
bind = "127.0.0.1:8080"
service_bind = "127.0.0.1:8080"
"#;
        assert!(Config::from_toml_str(same_bind).is_err());

        let bad_level = r#"
[server]
bind = "127.0.0.1:8080"

[logging]
level = "loud"
"#;
        assert!(Config::from_toml_str(bad_level).is_err());

        let empty_domain = r#"
[server]
bind = "127.0.0.1:8080"

[[politeness.domains]]
domain = "  "
delay = 10
"#;
        assert!(Config::from_toml_str(empty_domain).is_err());
    }

    #[test]
    fn test_sample_config_parses() {
        let config = Config::from_toml_str(include_str!("../../config/config.toml")).unwrap();
        assert_eq!(config.politeness.domains.len(), 2);
        assert!(config.server.service_bind.is_some());
        assert!(config.cache.snapshot_path.is_some());
    }

    #[test]
    fn test_logging_filter_directive() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.filter_directive(false), "polite_proxy=info,hyper=warn");
        assert_eq!(logging.filter_directive(true), "polite_proxy=debug,hyper=warn");
    }
}

//! # 批量礼貌性检查服务
//!
//! 接收一组 URL，按与代理相同的 robots.txt 与抓取间隔规则判断哪些可以立即抓取，
//! 不进行任何转发。
//!
//! - `canonical`: URL 规范化
//! - `handlers`: `/politeness` 与 `/politeness/verbose` HTTP 接口

pub mod canonical;
pub mod handlers;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::politeness::PolitenessLimiter;
use crate::robots::RobotsServer;

pub use canonical::normalize;
pub use handlers::PolitenessApi;

pub const ROBOTS_BLOCKED_MESSAGE: &str = "Blocked because URL is excluded from allowed URLs.";

/// Verdict for one URL of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPoliteness {
    pub url: String,
    pub error: Option<String>,
    pub allowed: bool,
    /// Milliseconds to wait before fetching, -1 when waiting would not help
    #[serde(rename = "retryAfter")]
    pub retry_after: i64,
}

impl UrlPoliteness {
    fn allowed(url: String) -> Self {
        Self {
            url,
            error: None,
            allowed: true,
            retry_after: -1,
        }
    }

    fn delayed(url: String, delay: u64, retry_after: u64) -> Self {
        Self {
            url,
            error: Some(format!(
                "There must be a delay of {} milliseconds between each request.",
                delay
            )),
            allowed: false,
            retry_after: i64::try_from(retry_after).unwrap_or(i64::MAX),
        }
    }

    fn blocked(url: String) -> Self {
        Self {
            url,
            error: Some(ROBOTS_BLOCKED_MESSAGE.to_string()),
            allowed: false,
            retry_after: -1,
        }
    }
}

/// Robots and rate-limit verdicts for URL batches, without forwarding
#[derive(Clone)]
pub struct PolitenessService {
    robots: Arc<RobotsServer>,
    limiter: Arc<PolitenessLimiter>,
}

impl PolitenessService {
    pub fn new(robots: Arc<RobotsServer>, limiter: Arc<PolitenessLimiter>) -> Self {
        Self { robots, limiter }
    }

    /// URLs of the batch that may be fetched right now
    pub async fn is_crawlable(&self, urls: &[String]) -> Vec<String> {
        self.is_crawlable_verbose(urls)
            .await
            .into_iter()
            .filter(|verdict| verdict.allowed)
            .map(|verdict| verdict.url)
            .collect()
    }

    /// One verdict per parseable URL, in input order.
    ///
    /// Only the first URL of a domain can be allowed; later ones in the same
    /// batch get the accumulated delay of the URLs before them.
    pub async fn is_crawlable_verbose(&self, urls: &[String]) -> Vec<UrlPoliteness> {
        let mut scheduled: HashMap<String, u64> = HashMap::new();
        let mut verdicts = Vec::with_capacity(urls.len());

        for raw in urls {
            let Some(parsed) = normalize(raw).and_then(|u| Url::parse(&u).ok()) else {
                debug!("Skipping malformed URL in batch: {}", raw);
                continue;
            };
            let Some(domain) = parsed.host_str().map(str::to_ascii_lowercase) else {
                continue;
            };
            let url = parsed.to_string();

            if !self.robots.allows(&parsed).await {
                verdicts.push(UrlPoliteness::blocked(url));
                continue;
            }

            let delay = self.limiter.delay_for_domain(&domain);
            let first_in_batch = !scheduled.contains_key(&domain);
            let waited = scheduled.entry(domain.clone()).or_insert(0);
            *waited += delay;

            if first_in_batch && self.limiter.is_allowed(&domain) {
                verdicts.push(UrlPoliteness::allowed(url));
            } else {
                verdicts.push(UrlPoliteness::delayed(url, delay, *waited));
            }
        }
        verdicts
    }
}

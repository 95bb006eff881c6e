//! # HTTP 响应缓存模块
//!
//! 按 (URL, Content-Type) 存储代理过的响应，并根据请求中的
//! `Cache-Control` 计算新鲜度、陈旧度与年龄，决定是否可以直接返回缓存。
//!
//! - `control`: 请求侧 `Cache-Control` 解析与新鲜度判断
//! - `storage`: 带容量与 TTL 限制的内存存储及快照持久化
//! - `handler`: 缓存键划分、读取与写入策略

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hyper::header::{HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_TYPE, EXPIRES};
use hyper::{Body, HeaderMap, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod control;
pub mod handler;
pub mod storage;

pub use control::RequestCacheControl;
pub use handler::CacheHandler;
pub use storage::{CacheMetrics, CacheStats, ResponseStore};

/// Joins the values of a repeated header inside [`CacheEntry::headers`]
pub const HEADER_SEPARATOR: &str = "---_ENTRY_---";

/// Largest response `max-age` kept, in seconds
pub const MAX_AGE_CEILING: i64 = i32::MAX as i64;

/// Content type used for wildcard cache keys and for responses without one
pub const WILDCARD_CONTENT_TYPE: &str = "*/*";

/// Cache key: URL plus the content type it was requested or served as
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub url: String,
    pub content_type: Option<String>,
}

impl CacheKey {
    pub fn new(url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: Some(content_type.into()),
        }
    }

    /// Key without any content type
    pub fn url_only(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: None,
        }
    }

    /// Key with the `*/*` content type
    pub fn wildcard(url: impl Into<String>) -> Self {
        Self::new(url, WILDCARD_CONTENT_TYPE)
    }

    pub fn is_wildcard(&self) -> bool {
        match &self.content_type {
            None => true,
            Some(ct) => ct == WILDCARD_CONTENT_TYPE,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.content_type {
            Some(ct) => write!(f, "{} - {}", self.url, ct),
            None => write!(f, "{} - <none>", self.url),
        }
    }
}

/// A response captured after a successful forward. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Vec<u8>,
    pub url: String,
    /// `max-age` from the response in seconds, -1 when absent
    pub max_age: i64,
    pub no_cache: bool,
    pub no_store: bool,
    pub expires: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    /// Header name to value; repeated headers joined with [`HEADER_SEPARATOR`]
    pub headers: BTreeMap<String, String>,
    pub content_type: String,
}

impl CacheEntry {
    /// Build an entry from response headers and the full body
    pub fn from_response(
        url: impl Into<String>,
        headers: &HeaderMap,
        data: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut max_age = -1;
        let mut no_cache = false;
        let mut no_store = false;

        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for directive in value.split(',').map(str::trim) {
                if directive.eq_ignore_ascii_case("no-cache") {
                    no_cache = true;
                } else if directive.eq_ignore_ascii_case("no-store") {
                    no_store = true;
                } else if let Some(seconds) = directive_value(directive, "max-age") {
                    max_age = seconds.map_or(-1, |v| v.min(MAX_AGE_CEILING));
                }
            }
        }

        // Unparseable Expires means already expired
        let expires = headers.get(EXPIRES).map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now)
        });

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(strip_whitespace)
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| WILDCARD_CONTENT_TYPE.to_string());

        Self {
            data,
            url: url.into(),
            max_age,
            no_cache,
            no_store,
            expires,
            fetched_at: now,
            headers: flatten_headers(headers),
            content_type,
        }
    }

    /// Bytes accounted against the store size limit
    pub fn size(&self) -> u64 {
        let header_bytes: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        (self.data.len() + header_bytes + self.url.len()) as u64
    }

    /// Response-side directives forbid serving this entry
    pub fn is_servable(&self) -> bool {
        !self.no_cache && !self.no_store
    }

    /// Earliest of `Expires` and `fetched_at + max-age`.
    /// Without either the entry expires the moment it was fetched.
    pub fn expiration(&self) -> DateTime<Utc> {
        let by_max_age = (self.max_age >= 0).then(|| {
            ChronoDuration::try_seconds(self.max_age)
                .and_then(|lifetime| self.fetched_at.checked_add_signed(lifetime))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });
        match (self.expires, by_max_age) {
            (Some(e), Some(m)) => e.min(m),
            (Some(e), None) => e,
            (None, Some(m)) => m,
            (None, None) => self.fetched_at,
        }
    }

    /// Seconds since the entry was fetched
    pub fn age(&self, now: DateTime<Utc>) -> i64 {
        (now - self.fetched_at).num_seconds().max(0)
    }

    /// Seconds the entry has been past its expiration, zero while fresh
    pub fn staleness(&self, now: DateTime<Utc>) -> i64 {
        (now - self.expiration()).num_seconds().max(0)
    }

    /// Seconds of freshness left, zero once expired
    pub fn freshness(&self, now: DateTime<Utc>) -> i64 {
        (self.expiration() - now).num_seconds().max(0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration() <= now
    }

    /// Rebuild the stored headers, splitting joined values again
    pub fn header_map(&self) -> HeaderMap {
        unflatten_headers(&self.headers)
    }

    /// Response served to the crawler on a cache hit
    pub fn to_response(&self) -> Result<Response<Body>, hyper::http::Error> {
        let mut response = Response::builder().status(StatusCode::OK);
        if let Some(headers) = response.headers_mut() {
            *headers = self.header_map();
            headers.insert("x-cache", HeaderValue::from_static("HIT"));
        }
        response.body(Body::from(self.data.clone()))
    }
}

/// Value of `name=value` when `directive` starts with `name`.
/// `Some(None)` when the value is missing or not a number.
pub(crate) fn directive_value(directive: &str, name: &str) -> Option<Option<i64>> {
    let lower = directive.to_ascii_lowercase();
    if !lower.starts_with(name) {
        return None;
    }
    let rest = lower[name.len()..].trim_start();
    if rest.is_empty() {
        return Some(None);
    }
    let value = rest.strip_prefix('=')?.trim().trim_matches('"');
    Some(value.parse::<i64>().ok().filter(|v| *v >= 0))
}

pub(crate) fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Collapse a header map into one string per header name
pub fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(HEADER_SEPARATOR);
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

pub fn unflatten_headers(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, joined) in headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in joined.split(HEADER_SEPARATOR) {
            if let Ok(value) = HeaderValue::from_str(value) {
                map.append(name.clone(), value);
            }
        }
    }
    map
}

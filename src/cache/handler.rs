use chrono::{DateTime, Utc};
use hyper::header::CONTENT_TYPE;
use hyper::HeaderMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::control::RequestCacheControl;
use super::storage::{CacheStats, ResponseStore};
use super::{strip_whitespace, CacheEntry, CacheKey};

/// Key partitioning and admission on top of [`ResponseStore`]
#[derive(Debug, Clone)]
pub struct CacheHandler {
    store: Arc<ResponseStore>,
    enabled: Arc<AtomicBool>,
}

impl CacheHandler {
    pub fn new(store: Arc<ResponseStore>, enabled: bool) -> Self {
        Self {
            store,
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn store(&self) -> &Arc<ResponseStore> {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Shared by every clone of this handler
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Keys tried for a lookup, most specific first
    pub fn lookup_keys(url: &str, request_headers: &HeaderMap) -> Vec<CacheKey> {
        match request_content_type(request_headers) {
            Some(ct) => vec![CacheKey::new(url, ct)],
            None => vec![CacheKey::url_only(url), CacheKey::wildcard(url)],
        }
    }

    /// Find a servable entry for `url` that satisfies the request's `Cache-Control`
    pub async fn lookup(
        &self,
        url: &str,
        request_headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Option<Arc<CacheEntry>> {
        if !self.is_enabled() {
            return None;
        }

        let control = RequestCacheControl::from_headers(request_headers);
        for key in Self::lookup_keys(url, request_headers) {
            let Some(entry) = self.store.get(&key, now).await else {
                continue;
            };
            if entry.is_servable() && control.is_satisfied_by(&entry, now) {
                debug!("Cache hit for {}", key);
                self.store.record_hit().await;
                metrics::counter!("polite_proxy_cache_hits_total").increment(1);
                return Some(entry);
            }
        }

        self.store.record_miss().await;
        None
    }

    /// Record a forwarded response. Returns whether anything was stored.
    pub async fn put(
        &self,
        url: &str,
        request_headers: &HeaderMap,
        response_headers: &HeaderMap,
        body: Vec<u8>,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_enabled() || body.is_empty() || response_headers.is_empty() {
            return false;
        }

        let entry = Arc::new(CacheEntry::from_response(url, response_headers, body, now));

        if let Some(ct) = request_content_type(request_headers) {
            return self.store_entry(CacheKey::new(url, ct), entry).await;
        }

        let primary = CacheKey::new(url, entry.content_type.clone());
        let mut stored = self.store_entry(primary.clone(), Arc::clone(&entry)).await;

        for key in [CacheKey::wildcard(url), CacheKey::url_only(url)] {
            if key == primary {
                continue;
            }
            if !self.store.contains(&key, now).await {
                stored |= self.store_entry(key, Arc::clone(&entry)).await;
            }
        }
        stored
    }

    async fn store_entry(&self, key: CacheKey, entry: Arc<CacheEntry>) -> bool {
        match self.store.put(key, entry).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write cache entry: {}", e);
                false
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.stats().await
    }
}

fn request_content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(strip_whitespace)
        .filter(|ct| !ct.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use chrono::{Duration, TimeZone};
    use hyper::header::HeaderValue;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()
    }

    fn handler() -> CacheHandler {
        CacheHandler::new(Arc::new(ResponseStore::new(&CacheConfig::default())), true)
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(*v));
        }
        map
    }

    const URL: &str = "http://example.com/a";

    #[tokio::test]
    async fn test_untyped_request_writes_three_keys() {
        let cache = handler();
        let resp = headers(&[("content-type", "text/html"), ("cache-control", "max-age=60")]);
        assert!(cache.put(URL, &HeaderMap::new(), &resp, b"page".to_vec(), now()).await);

        let store = cache.store();
        assert!(store.contains(&CacheKey::new(URL, "text/html"), now()).await);
        assert!(store.contains(&CacheKey::wildcard(URL), now()).await);
        assert!(store.contains(&CacheKey::url_only(URL), now()).await);
    }

    #[tokio::test]
    async fn test_response_without_content_type_lands_on_wildcard() {
        let cache = handler();
        let resp = headers(&[("cache-control", "max-age=60")]);
        cache.put(URL, &HeaderMap::new(), &resp, b"x".to_vec(), now()).await;
        assert_eq!(cache.store().len().await, 2);
        assert!(cache.store().contains(&CacheKey::wildcard(URL), now()).await);
    }

    #[tokio::test]
    async fn test_typed_request_writes_only_its_key() {
        let cache = handler();
        let req = headers(&[("content-type", "application/json")]);
        let resp = headers(&[("content-type", "application/json")]);
        cache.put(URL, &req, &resp, b"{}".to_vec(), now()).await;

        assert_eq!(cache.store().len().await, 1);
        assert!(cache.lookup(URL, &HeaderMap::new(), now()).await.is_none());
        assert!(cache.lookup(URL, &req, now()).await.is_some());
    }

    #[tokio::test]
    async fn test_content_types_partition_bodies() {
        let cache = handler();
        let json_req = headers(&[("content-type", "application/json")]);
        let resp_json = headers(&[("content-type", "application/json"), ("cache-control", "max-age=60")]);
        let resp_html = headers(&[("content-type", "text/html"), ("cache-control", "max-age=60")]);

        cache.put(URL, &json_req, &resp_json, b"{\"a\":1}".to_vec(), now()).await;
        cache.put(URL, &HeaderMap::new(), &resp_html, b"<p>a</p>".to_vec(), now()).await;

        let json = cache.lookup(URL, &json_req, now()).await.unwrap();
        let html = cache.lookup(URL, &HeaderMap::new(), now()).await.unwrap();
        assert_eq!(json.data, b"{\"a\":1}");
        assert_eq!(html.data, b"<p>a</p>");
    }

    #[tokio::test]
    async fn test_request_content_type_whitespace_ignored() {
        let cache = handler();
        let req = headers(&[("content-type", "text/html; charset=utf-8")]);
        let resp = headers(&[("content-type", "text/html")]);
        cache.put(URL, &req, &resp, b"x".to_vec(), now()).await;

        let lookup = headers(&[("content-type", "text/html;charset=utf-8")]);
        assert!(cache.lookup(URL, &lookup, now()).await.is_some());
    }

    #[tokio::test]
    async fn test_fresh_wildcard_not_overwritten() {
        let cache = handler();
        let first = headers(&[("content-type", "text/html"), ("cache-control", "max-age=600")]);
        let second = headers(&[("content-type", "text/plain"), ("cache-control", "max-age=600")]);
        cache.put(URL, &HeaderMap::new(), &first, b"first".to_vec(), now()).await;
        cache.put(URL, &HeaderMap::new(), &second, b"second".to_vec(), now()).await;

        let wildcard = cache.store().get(&CacheKey::wildcard(URL), now()).await.unwrap();
        assert_eq!(wildcard.data, b"first");
        let plain = cache.store().get(&CacheKey::new(URL, "text/plain"), now()).await.unwrap();
        assert_eq!(plain.data, b"second");
    }

    #[tokio::test]
    async fn test_stale_wildcard_kept_until_evicted() {
        let cache = handler();
        let first = headers(&[("content-type", "text/html"), ("cache-control", "max-age=10")]);
        let second = headers(&[("content-type", "text/plain"), ("cache-control", "max-age=10")]);
        cache.put(URL, &HeaderMap::new(), &first, b"first".to_vec(), now()).await;

        let later = now() + Duration::seconds(30);
        cache.put(URL, &HeaderMap::new(), &second, b"second".to_vec(), later).await;

        let url_only = cache.store().get(&CacheKey::url_only(URL), later).await.unwrap();
        assert_eq!(url_only.data, b"first");
        let plain = cache.store().get(&CacheKey::new(URL, "text/plain"), later).await.unwrap();
        assert_eq!(plain.data, b"second");

        cache.store().remove(&CacheKey::url_only(URL)).await;
        cache.put(URL, &HeaderMap::new(), &second, b"third".to_vec(), later).await;
        let url_only = cache.store().get(&CacheKey::url_only(URL), later).await.unwrap();
        assert_eq!(url_only.data, b"third");
    }

    #[tokio::test]
    async fn test_huge_max_age_lookup_under_max_stale() {
        let cache = handler();
        let resp = headers(&[("cache-control", "max-age=99999999999999")]);
        assert!(cache.put(URL, &HeaderMap::new(), &resp, b"x".to_vec(), now()).await);

        let req = headers(&[("cache-control", "max-stale=10")]);
        assert!(cache.lookup(URL, &req, now()).await.is_some());
        let req = headers(&[("cache-control", "min-fresh=3600")]);
        assert!(cache.lookup(URL, &req, now()).await.is_some());
    }

    #[tokio::test]
    async fn test_huge_max_age_rewrite_same_url() {
        let cache = handler();
        let resp = headers(&[("content-type", "text/html"), ("cache-control", "max-age=99999999999999999")]);
        assert!(cache.put(URL, &HeaderMap::new(), &resp, b"one".to_vec(), now()).await);

        let later = now() + Duration::seconds(5);
        assert!(cache.put(URL, &HeaderMap::new(), &resp, b"two".to_vec(), later).await);
        let primary = cache.store().get(&CacheKey::new(URL, "text/html"), later).await.unwrap();
        assert_eq!(primary.data, b"two");
    }

    #[tokio::test]
    async fn test_admission_rules() {
        let cache = handler();
        assert!(!cache.put(URL, &HeaderMap::new(), &headers(&[("a", "b")]), Vec::new(), now()).await);
        assert!(!cache.put(URL, &HeaderMap::new(), &HeaderMap::new(), b"x".to_vec(), now()).await);
        assert!(cache.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_no_store_entries_are_never_served() {
        let cache = handler();
        let resp = headers(&[("cache-control", "no-store, max-age=600")]);
        assert!(cache.put(URL, &HeaderMap::new(), &resp, b"secret".to_vec(), now()).await);
        assert!(cache.lookup(URL, &HeaderMap::new(), now()).await.is_none());
    }

    #[tokio::test]
    async fn test_request_no_cache_bypasses() {
        let cache = handler();
        let resp = headers(&[("cache-control", "max-age=600")]);
        cache.put(URL, &HeaderMap::new(), &resp, b"x".to_vec(), now()).await;

        let req = headers(&[("cache-control", "no-cache")]);
        assert!(cache.lookup(URL, &req, now()).await.is_none());
        assert!(cache.lookup(URL, &HeaderMap::new(), now()).await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = CacheHandler::new(Arc::new(ResponseStore::new(&CacheConfig::default())), false);
        let resp = headers(&[("cache-control", "max-age=600")]);
        assert!(!cache.put(URL, &HeaderMap::new(), &resp, b"x".to_vec(), now()).await);
        assert!(cache.lookup(URL, &HeaderMap::new(), now()).await.is_none());
    }

    #[tokio::test]
    async fn test_toggle_is_shared_between_clones() {
        let cache = handler();
        let shared = cache.clone();
        let resp = headers(&[("cache-control", "max-age=600")]);
        cache.put(URL, &HeaderMap::new(), &resp, b"x".to_vec(), now()).await;

        shared.set_enabled(false);
        assert!(!cache.is_enabled());
        assert!(cache.lookup(URL, &HeaderMap::new(), now()).await.is_none());

        shared.set_enabled(true);
        assert!(cache.lookup(URL, &HeaderMap::new(), now()).await.is_some());
    }
}

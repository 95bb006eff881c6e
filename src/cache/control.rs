use chrono::{DateTime, Utc};
use hyper::header::CACHE_CONTROL;
use hyper::HeaderMap;

use super::{directive_value, CacheEntry};

/// A request-side `Cache-Control` directive relevant to cache lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    NoCache,
    /// `None` when the directive carried no usable value
    MaxAge(Option<i64>),
    MaxStale(Option<i64>),
    MinFresh(Option<i64>),
}

/// Parsed request `Cache-Control`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCacheControl {
    directives: Vec<Directive>,
}

impl RequestCacheControl {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let directives = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|raw| parse_directive(raw.trim()))
            .collect();
        Self { directives }
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Whether `entry` may answer a request carrying these directives at `now`
    pub fn is_satisfied_by(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.directives.iter().all(|directive| match *directive {
            Directive::NoCache => false,
            Directive::MaxAge(Some(max_age)) => entry.age(now) <= max_age,
            Directive::MaxAge(None) => true,
            Directive::MaxStale(Some(max_stale)) => entry.staleness(now) <= max_stale,
            // Without a value any staleness is acceptable
            Directive::MaxStale(None) => true,
            Directive::MinFresh(Some(min_fresh)) => entry.freshness(now) >= min_fresh,
            Directive::MinFresh(None) => false,
        })
    }
}

fn parse_directive(raw: &str) -> Option<Directive> {
    if raw.eq_ignore_ascii_case("no-cache") {
        return Some(Directive::NoCache);
    }
    if let Some(value) = directive_value(raw, "max-age") {
        return Some(Directive::MaxAge(value));
    }
    if let Some(value) = directive_value(raw, "max-stale") {
        return Some(Directive::MaxStale(value));
    }
    if let Some(value) = directive_value(raw, "min-fresh") {
        return Some(Directive::MinFresh(value));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use hyper::header::HeaderValue;

    fn fetched() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap()
    }

    fn entry(max_age: i64, expires: Option<DateTime<Utc>>) -> CacheEntry {
        CacheEntry {
            data: b"data".to_vec(),
            url: "http://example.com/".to_string(),
            max_age,
            no_cache: false,
            no_store: false,
            expires,
            fetched_at: fetched(),
            headers: Default::default(),
            content_type: "*/*".to_string(),
        }
    }

    fn control(value: &'static str) -> RequestCacheControl {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(value));
        RequestCacheControl::from_headers(&headers)
    }

    #[test]
    fn test_parse_directives() {
        let cc = control("no-cache, max-age=10, max-stale, min-fresh=5, private");
        assert_eq!(
            cc.directives(),
            &[
                Directive::NoCache,
                Directive::MaxAge(Some(10)),
                Directive::MaxStale(None),
                Directive::MinFresh(Some(5)),
            ]
        );
        assert!(RequestCacheControl::from_headers(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn test_no_directives_accepts() {
        let cc = RequestCacheControl::default();
        assert!(cc.is_satisfied_by(&entry(-1, None), fetched() + Duration::days(400)));
    }

    #[test]
    fn test_no_cache_rejects() {
        assert!(!control("no-cache").is_satisfied_by(&entry(3600, None), fetched()));
    }

    #[test]
    fn test_max_age_uses_entry_age() {
        let cc = control("max-age=60");
        let e = entry(-1, None);
        assert!(cc.is_satisfied_by(&e, fetched() + Duration::seconds(60)));
        assert!(!cc.is_satisfied_by(&e, fetched() + Duration::seconds(61)));
    }

    #[test]
    fn test_max_stale_with_plain_max_age() {
        let cc = control("max-stale=30");
        let e = entry(100, None);
        assert!(cc.is_satisfied_by(&e, fetched() + Duration::seconds(50)));
        assert!(cc.is_satisfied_by(&e, fetched() + Duration::seconds(130)));
        assert!(!cc.is_satisfied_by(&e, fetched() + Duration::seconds(131)));
    }

    #[test]
    fn test_max_stale_with_expires_earlier_than_max_age() {
        let cc = control("max-stale=30");
        let e = entry(3600, Some(fetched() + Duration::seconds(100)));
        assert!(cc.is_satisfied_by(&e, fetched() + Duration::seconds(130)));
        assert!(!cc.is_satisfied_by(&e, fetched() + Duration::seconds(200)));
    }

    #[test]
    fn test_min_fresh() {
        let e = entry(100, None);
        assert!(control("min-fresh=20").is_satisfied_by(&e, fetched() + Duration::seconds(80)));
        assert!(!control("min-fresh=20").is_satisfied_by(&e, fetched() + Duration::seconds(81)));
        assert!(!control("min-fresh").is_satisfied_by(&e, fetched()));
    }

    #[test]
    fn test_freshness_check_is_repeatable() {
        let cc = control("max-age=100, max-stale=10, min-fresh=5");
        let e = entry(120, Some(fetched() + Duration::seconds(200)));
        let now = fetched() + Duration::seconds(90);
        let first = cc.is_satisfied_by(&e, now);
        for _ in 0..5 {
            assert_eq!(cc.is_satisfied_by(&e, now), first);
        }
        assert!(first);
    }
}

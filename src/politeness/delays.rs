use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use super::entry::PolitenessEntry;
use crate::config::{DomainDelayConfig, PolitenessConfig};
use crate::error::{ProxyError, ProxyResult};

/// Upper bound on the diagnostic listing
pub const MAX_LISTED_ENTRIES: usize = 2000;

#[derive(Debug)]
struct DomainPattern {
    source: String,
    regex: Regex,
    delay: u64,
}

impl DomainPattern {
    fn compile(config: &DomainDelayConfig) -> ProxyResult<Self> {
        let body = config
            .domain
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = RegexBuilder::new(&format!("^{}", body))
            .case_insensitive(true)
            .build()
            .map_err(|e| {
                ProxyError::config(format!(
                    "invalid politeness domain '{}': {}",
                    config.domain, e
                ))
            })?;
        Ok(Self {
            source: config.domain.clone(),
            regex,
            delay: config.delay,
        })
    }
}

#[derive(Debug)]
struct ConfiguredDelays {
    default_delay: u64,
    patterns: Vec<DomainPattern>,
}

impl ConfiguredDelays {
    fn compile(config: &PolitenessConfig) -> ProxyResult<Self> {
        let patterns = config
            .domains
            .iter()
            .map(DomainPattern::compile)
            .collect::<ProxyResult<Vec<_>>>()?;
        Ok(Self {
            default_delay: config.default_delay,
            patterns,
        })
    }
}

/// Configured and robots-discovered crawl delays per domain
#[derive(Debug)]
pub struct DomainDelayTable {
    configured: RwLock<ConfiguredDelays>,
    entries: RwLock<HashMap<String, PolitenessEntry>>,
}

impl DomainDelayTable {
    pub fn from_config(config: &PolitenessConfig) -> ProxyResult<Self> {
        let table = Self {
            configured: RwLock::new(ConfiguredDelays::compile(config)?),
            entries: RwLock::new(HashMap::new()),
        };
        table.merge_configured(&config.domains);
        Ok(table)
    }

    /// Replace the configured part wholesale and merge it into the stored entries
    pub fn reload(&self, config: &PolitenessConfig) -> ProxyResult<()> {
        let compiled = ConfiguredDelays::compile(config)?;
        *self
            .configured
            .write()
            .unwrap_or_else(PoisonError::into_inner) = compiled;
        self.merge_configured(&config.domains);
        info!(
            "Politeness delay table reloaded ({} configured domains, default {}ms)",
            config.domains.len(),
            config.default_delay
        );
        Ok(())
    }

    pub fn default_delay(&self) -> u64 {
        self.configured
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .default_delay
    }

    /// Delay of the first configured pattern matching `domain`
    pub fn configured_delay(&self, domain: &str) -> Option<u64> {
        let configured = self
            .configured
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        configured
            .patterns
            .iter()
            .find(|p| p.regex.is_match(domain))
            .map(|p| {
                debug!("Domain {} matched configured pattern {}", domain, p.source);
                p.delay
            })
    }

    /// Milliseconds that must pass between two requests to `domain`
    pub fn effective_delay(&self, domain: &str) -> u64 {
        let domain = domain.to_ascii_lowercase();
        let configured = self.configured_delay(&domain);
        let stored = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&domain)
            .map(|e| e.delay);

        match (configured, stored) {
            (Some(c), Some(s)) => c.max(s),
            (Some(c), None) => c,
            (None, Some(s)) => s,
            (None, None) => self.default_delay(),
        }
    }

    /// Record a robots.txt crawl delay; the enforced delay is never lowered
    pub fn update_robots_delay(&self, domain: &str, delay_ms: u64) {
        let domain = domain.to_ascii_lowercase();
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(&domain) {
            Some(entry) => {
                entry.apply_robots_delay(delay_ms);
                debug!("Updated entry originated from robots.txt {:?}", entry);
            }
            None => {
                let entry = PolitenessEntry::from_robots(domain.clone(), delay_ms);
                debug!("New entry originated from robots.txt {:?}", entry);
                entries.insert(domain, entry);
            }
        }
    }

    /// Fold configured delays into the stored entries.
    ///
    /// A new domain is inserted as-is. A larger configured delay replaces the
    /// enforced one. A changed smaller one is recorded and lowers the
    /// enforced delay only as far as the robots delay allows.
    pub fn merge_configured(&self, configured: &[DomainDelayConfig]) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for cfg in configured {
            let domain = cfg.domain.to_ascii_lowercase();
            match entries.get_mut(&domain) {
                None => {
                    debug!("New configured delay entry for {}: {}ms", domain, cfg.delay);
                    entries.insert(domain.clone(), PolitenessEntry::configured(domain, cfg.delay));
                }
                Some(entry) if entry.delay < cfg.delay => {
                    debug!(
                        "Raising delay for {} from {}ms to configured {}ms",
                        domain, entry.delay, cfg.delay
                    );
                    entry.delay = cfg.delay;
                    entry.configured_delay = cfg.delay;
                }
                Some(entry) if entry.configured_delay != cfg.delay => {
                    entry.configured_delay = cfg.delay;
                    if cfg.delay >= entry.robots_delay {
                        entry.delay = cfg.delay;
                    }
                    debug!("Configured delay for {} changed: {:?}", domain, entry);
                }
                Some(_) => {}
            }
        }
    }

    pub fn entry(&self, domain: &str) -> Option<PolitenessEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&domain.to_ascii_lowercase())
            .cloned()
    }

    /// All stored entries sorted by domain, at most [`MAX_LISTED_ENTRIES`]
    pub fn entries(&self) -> Vec<PolitenessEntry> {
        let mut list: Vec<PolitenessEntry> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        list.sort_by(|a, b| a.domain.cmp(&b.domain));
        list.truncate(MAX_LISTED_ENTRIES);
        list
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(default_delay: u64, domains: &[(&str, u64)]) -> PolitenessConfig {
        PolitenessConfig {
            default_delay,
            sweep_interval_secs: 60,
            domains: domains
                .iter()
                .map(|(d, delay)| DomainDelayConfig {
                    domain: d.to_string(),
                    delay: *delay,
                })
                .collect(),
        }
    }

    #[test]
    fn test_default_and_configured_delays() {
        let table =
            DomainDelayTable::from_config(&config(1000, &[("slow.example", 5000), ("*.gov", 3000)]))
                .unwrap();

        assert_eq!(table.effective_delay("fast.example"), 1000);
        assert_eq!(table.effective_delay("slow.example"), 5000);
        assert_eq!(table.effective_delay("SLOW.example"), 5000);
        assert_eq!(table.effective_delay("www.usa.gov"), 3000);
    }

    #[test]
    fn test_first_matching_pattern_wins() {
        let table =
            DomainDelayTable::from_config(&config(1000, &[("*example", 200), ("slow.example", 9000)]))
                .unwrap();
        assert_eq!(table.configured_delay("slow.example"), Some(200));
    }

    #[test]
    fn test_robots_delay_is_monotonic() {
        let table = DomainDelayTable::from_config(&config(1000, &[])).unwrap();

        table.update_robots_delay("a.test", 4000);
        assert_eq!(table.effective_delay("a.test"), 4000);

        table.update_robots_delay("a.test", 500);
        assert_eq!(table.effective_delay("a.test"), 4000);
        assert_eq!(table.entry("a.test").unwrap().robots_delay, 500);
    }

    #[test]
    fn test_configured_floor_applies_over_robots() {
        let table = DomainDelayTable::from_config(&config(1000, &[("b.test", 6000)])).unwrap();
        table.update_robots_delay("b.test", 2000);
        assert_eq!(table.effective_delay("b.test"), 6000);

        table.update_robots_delay("b.test", 8000);
        assert_eq!(table.effective_delay("b.test"), 8000);
    }

    #[test]
    fn test_reload_merges_configured_delays() {
        let table = DomainDelayTable::from_config(&config(1000, &[("c.test", 5000)])).unwrap();
        table.update_robots_delay("c.test", 3000);

        // Lowered but still above the robots delay: applied
        table.reload(&config(1000, &[("c.test", 4000)])).unwrap();
        let entry = table.entry("c.test").unwrap();
        assert_eq!(entry.configured_delay, 4000);
        assert_eq!(entry.delay, 4000);

        // Lowered below the robots delay: recorded only
        table.reload(&config(1000, &[("c.test", 1000)])).unwrap();
        let entry = table.entry("c.test").unwrap();
        assert_eq!(entry.configured_delay, 1000);
        assert_eq!(entry.delay, 4000);

        // Raised: replaces the enforced delay
        table.reload(&config(1000, &[("c.test", 7000)])).unwrap();
        assert_eq!(table.entry("c.test").unwrap().delay, 7000);
    }

    #[test]
    fn test_reload_replaces_default_and_patterns() {
        let table = DomainDelayTable::from_config(&config(1000, &[("*.org", 2000)])).unwrap();
        assert_eq!(table.effective_delay("x.org"), 2000);

        table.reload(&config(300, &[])).unwrap();
        assert_eq!(table.default_delay(), 300);
        assert_eq!(table.configured_delay("x.org"), None);
        assert_eq!(table.effective_delay("x.org"), 300);
    }

    #[test]
    fn test_entries_sorted() {
        let table = DomainDelayTable::from_config(&config(1000, &[("b.test", 10)])).unwrap();
        table.update_robots_delay("a.test", 20);
        let list = table.entries();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].domain, "a.test");
        assert_eq!(list[1].domain, "b.test");
        assert_eq!(table.len(), 2);
    }
}

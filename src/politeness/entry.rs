use serde::{Deserialize, Serialize};

/// Delay bookkeeping for one domain, all values in milliseconds.
///
/// `delay` is what the limiter enforces and never drops below
/// `robots_delay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolitenessEntry {
    pub domain: String,
    pub delay: u64,
    pub robots_delay: u64,
    pub configured_delay: u64,
}

impl PolitenessEntry {
    /// Entry created from an operator-configured delay
    pub fn configured(domain: impl Into<String>, delay: u64) -> Self {
        Self {
            domain: domain.into(),
            delay,
            robots_delay: 0,
            configured_delay: delay,
        }
    }

    /// Entry first seen through a robots.txt crawl-delay
    pub fn from_robots(domain: impl Into<String>, delay: u64) -> Self {
        Self {
            domain: domain.into(),
            delay,
            robots_delay: delay,
            configured_delay: 0,
        }
    }

    /// Record a robots.txt delay, raising `delay` when it is larger
    pub fn apply_robots_delay(&mut self, robots_delay: u64) {
        self.robots_delay = robots_delay;
        if self.delay < robots_delay {
            self.delay = robots_delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robots_delay_only_raises() {
        let mut entry = PolitenessEntry::configured("example.com", 2000);
        entry.apply_robots_delay(5000);
        assert_eq!(entry.delay, 5000);
        assert_eq!(entry.robots_delay, 5000);

        entry.apply_robots_delay(1000);
        assert_eq!(entry.delay, 5000);
        assert_eq!(entry.robots_delay, 1000);
        assert_eq!(entry.configured_delay, 2000);
    }

    #[test]
    fn test_serializes_field_names() {
        let json = serde_json::to_value(PolitenessEntry::from_robots("a.test", 1500)).unwrap();
        assert_eq!(json["domain"], "a.test");
        assert_eq!(json["delay"], 1500);
        assert_eq!(json["robots_delay"], 1500);
        assert_eq!(json["configured_delay"], 0);
    }
}

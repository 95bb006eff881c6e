use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::directives::{HostDirectives, UserAgentDirectives};
use super::rule::{Rule, RuleKind};

static LINE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([A-Za-z\-]+):(.*)$").expect("Line pattern should be a valid regex")
});

static MARKUP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]+>").expect("Markup pattern should be a valid regex"));

const KNOWN_KEYS: &[&str] = &[
    "allow",
    "disallow",
    "user-agent",
    "crawl-delay",
    "host",
    "sitemap",
];

/// Parse a robots.txt document into the directive set for `user_agent`.
///
/// Never fails: unknown keys, malformed lines and uncompilable patterns are
/// skipped.
pub fn parse(content: &str, user_agent: &str) -> HostDirectives {
    let mut directives = HostDirectives::new(user_agent);
    let mut pending_agents: Vec<String> = Vec::new();
    let mut current: Option<UserAgentDirectives> = None;

    for raw in content.split(&['\n', '\r'][..]) {
        let line = match raw.find('#') {
            Some(idx) => &raw[..idx],
            None => raw,
        };
        let line = MARKUP_PATTERN.replace_all(line, "");
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some(caps) = LINE_PATTERN.captures(line) else {
            debug!("Unrecognized line in robots.txt: {}", line);
            continue;
        };
        let key = caps[1].to_ascii_lowercase();
        let value = caps[2].trim();

        if !KNOWN_KEYS.contains(&key.as_str()) {
            debug!("Unrecognized rule in robots.txt: {}", key);
            continue;
        }

        if key == "user-agent" {
            // A user-agent after rules starts a new group
            if let Some(group) = current.take() {
                directives.add_group(group);
                pending_agents.clear();
            }
            pending_agents.push(value.to_ascii_lowercase());
            continue;
        }

        let group = current.get_or_insert_with(|| {
            if pending_agents.is_empty() {
                pending_agents.push("*".to_string());
            }
            UserAgentDirectives::new(std::mem::take(&mut pending_agents))
        });

        match key.as_str() {
            "allow" | "disallow" => {
                let kind = if key == "allow" {
                    RuleKind::Allow
                } else {
                    RuleKind::Disallow
                };
                match Rule::new(kind, value) {
                    Ok(rule) => group.add_rule(rule),
                    Err(e) => debug!("Skipping robots.txt rule '{}': {}", value, e),
                }
            }
            "crawl-delay" => match value.parse::<f64>() {
                Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => {
                    group.set_crawl_delay(seconds)
                }
                _ => debug!("Ignoring invalid crawl-delay '{}'", value),
            },
            // host and sitemap close the agent list but carry no access rules
            _ => {}
        }
    }

    if let Some(group) = current {
        directives.add_group(group);
    }

    directives
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robots::Access;

    #[test]
    fn test_disallow_all() {
        let d = parse("User-agent: *\nDisallow: /", "polite-proxy");
        assert!(!d.allows("/"));
        assert!(!d.allows("/a/b"));
    }

    #[test]
    fn test_wildcard_and_specific_groups() {
        let content = "\
User-agent: *
Disallow: /private

User-agent: mybot
Allow: /private
";
        let mine = parse(content, "mybot");
        assert_eq!(mine.groups().len(), 2);
        assert!(mine.allows("/private/x"));

        let other = parse(content, "otherbot");
        assert!(!other.allows("/private/x"));
        assert!(other.allows("/public"));
    }

    #[test]
    fn test_consecutive_user_agents_share_group() {
        let content = "User-agent: a\nUser-agent: mybot\nDisallow: /x\n";
        let d = parse(content, "mybot");
        assert_eq!(d.groups().len(), 1);
        assert_eq!(d.groups()[0].user_agents(), &["a", "mybot"]);
        assert!(!d.allows("/x"));
    }

    #[test]
    fn test_rules_before_user_agent_go_to_wildcard() {
        let d = parse("Disallow: /tmp\n", "mybot");
        assert_eq!(d.groups().len(), 1);
        assert!(d.groups()[0].is_wildcard());
        assert!(!d.allows("/tmp/file"));
    }

    #[test]
    fn test_comments_markup_and_case() {
        let content = "\
<html><body>
USER-AGENT: *   # everyone
<p>DisAllow: /secret</p>
# Disallow: /commented
Sitemap: http://example.com/sitemap.xml
Foo: bar
garbage line
";
        let d = parse(content, "mybot");
        assert_eq!(d.check_access("/secret/1"), Access::Disallowed);
        assert_eq!(d.check_access("/commented"), Access::Undefined);
    }

    #[test]
    fn test_crlf_and_crawl_delay() {
        let content = "User-agent: *\r\nCrawl-delay: 1.5\r\nDisallow: /a\r\n";
        let d = parse(content, "mybot");
        assert_eq!(d.crawl_delay_ms(), Some(1500));
        assert!(!d.allows("/a"));

        let d = parse("User-agent: *\nCrawl-delay: soon\n", "mybot");
        assert_eq!(d.crawl_delay_ms(), None);
    }

    #[test]
    fn test_empty_disallow_allows_everything() {
        let d = parse("User-agent: *\nDisallow:\n", "mybot");
        assert!(d.allows("/"));
        assert!(d.allows("/anything"));
    }

    #[test]
    fn test_empty_document() {
        let d = parse("", "mybot");
        assert!(d.is_empty());
        assert!(d.allows("/"));
    }
}

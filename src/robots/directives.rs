use tokio::time::{Duration, Instant};

use super::rule::{Rule, RuleKind};
use super::Access;

/// Directive sets older than this are fetched again
pub const EXPIRATION_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// How well a group's `User-agent:` tokens match our agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgentMatch {
    Wildcard,
    /// Token is a prefix of our agent; longer prefixes rank higher
    Prefix(usize),
    Exact,
}

/// One `User-agent:` block and the rules that follow it
#[derive(Debug, Clone, Default)]
pub struct UserAgentDirectives {
    user_agents: Vec<String>,
    rules: Vec<Rule>,
    crawl_delay: Option<f64>,
}

impl UserAgentDirectives {
    pub fn new(user_agents: Vec<String>) -> Self {
        Self {
            user_agents: user_agents
                .into_iter()
                .map(|ua| ua.trim().to_ascii_lowercase())
                .collect(),
            rules: Vec::new(),
            crawl_delay: None,
        }
    }

    pub fn user_agents(&self) -> &[String] {
        &self.user_agents
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Crawl delay in seconds, as written
    pub fn crawl_delay(&self) -> Option<f64> {
        self.crawl_delay
    }

    pub fn set_crawl_delay(&mut self, seconds: f64) {
        self.crawl_delay = Some(seconds);
    }

    pub fn is_wildcard(&self) -> bool {
        self.user_agents.iter().any(|ua| ua == "*")
    }

    /// Best match of this group against a lowercased agent, `None` if unrelated
    pub fn score(&self, agent: &str) -> Option<AgentMatch> {
        let product = agent.split('/').next().unwrap_or(agent);
        self.user_agents
            .iter()
            .filter_map(|token| {
                if token == "*" {
                    Some(AgentMatch::Wildcard)
                } else if token == agent || token == product {
                    Some(AgentMatch::Exact)
                } else if !token.is_empty() && agent.starts_with(token.as_str()) {
                    Some(AgentMatch::Prefix(token.len()))
                } else {
                    None
                }
            })
            .max()
    }

    /// The longest matching pattern decides; on equal length the later rule wins
    pub fn check_access(&self, path: &str) -> Access {
        let mut best: Option<&Rule> = None;
        for rule in self.rules.iter().filter(|r| r.matches(path)) {
            match best {
                Some(current) if current.specificity() > rule.specificity() => {}
                _ => best = Some(rule),
            }
        }

        match best.map(Rule::kind) {
            Some(RuleKind::Allow) => Access::Allowed,
            Some(RuleKind::Disallow) => Access::Disallowed,
            None => Access::Undefined,
        }
    }
}

/// Everything robots.txt says about one host, evaluated for one agent
#[derive(Debug, Clone)]
pub struct HostDirectives {
    user_agent: String,
    groups: Vec<UserAgentDirectives>,
    fetched_at: Instant,
}

impl HostDirectives {
    /// Empty set: every path is allowed
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.trim().to_ascii_lowercase(),
            groups: Vec::new(),
            fetched_at: Instant::now(),
        }
    }

    pub fn add_group(&mut self, group: UserAgentDirectives) {
        self.groups.push(group);
    }

    pub fn groups(&self) -> &[UserAgentDirectives] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn needs_refetch(&self) -> bool {
        self.fetched_at.elapsed() > EXPIRATION_DELAY
    }

    /// Groups that apply to our agent, most specific first.
    /// Equal scores keep declaration order.
    fn ranked_groups(&self) -> Vec<&UserAgentDirectives> {
        let mut scored: Vec<(AgentMatch, &UserAgentDirectives)> = self
            .groups
            .iter()
            .filter_map(|g| g.score(&self.user_agent).map(|s| (s, g)))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, g)| g).collect()
    }

    pub fn check_access(&self, path: &str) -> Access {
        self.ranked_groups()
            .into_iter()
            .map(|group| group.check_access(path))
            .find(|access| *access != Access::Undefined)
            .unwrap_or(Access::Undefined)
    }

    pub fn allows(&self, path: &str) -> bool {
        self.check_access(path) != Access::Disallowed
    }

    /// Crawl delay in milliseconds from the most specific group that declares one
    pub fn crawl_delay_ms(&self) -> Option<u64> {
        self.ranked_groups()
            .into_iter()
            .find_map(UserAgentDirectives::crawl_delay)
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| (secs * 1000.0).round() as u64)
    }
}

use regex::Regex;

use crate::error::{ProxyError, ProxyResult};

/// Whether a matching rule grants or denies access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Allow,
    Disallow,
}

/// A single `Allow:` or `Disallow:` line compiled to an anchored regex
#[derive(Debug, Clone)]
pub struct Rule {
    kind: RuleKind,
    pattern: String,
    regex: Regex,
}

impl Rule {
    pub fn new(kind: RuleKind, pattern: &str) -> ProxyResult<Self> {
        let regex = compile_pattern(pattern)?;
        Ok(Self {
            kind,
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// The pattern as written in robots.txt
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Length used to pick the most specific rule
    pub fn specificity(&self) -> usize {
        self.pattern.chars().count()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// Translate a robots.txt path pattern into a regex.
///
/// `*` matches any run of characters and a trailing `$` anchors the end of
/// the path. `\*` and `\$` stand for the literal characters. Everything else
/// is literal and the result is a prefix match unless `$`-terminated. An
/// empty pattern only matches the empty path.
pub fn compile_pattern(pattern: &str) -> ProxyResult<Regex> {
    if pattern.is_empty() {
        return Regex::new("^$").map_err(|e| ProxyError::robots(e.to_string()));
    }

    let chars: Vec<char> = pattern.chars().collect();
    let mut regex = String::from("^");
    let mut literal = String::new();
    let mut terminated = false;

    let mut pos = 0;
    while pos < chars.len() {
        let ch = chars[pos];
        match ch {
            '\\' if matches!(chars.get(pos + 1), Some('*') | Some('$')) => {
                literal.push(chars[pos + 1]);
                pos += 1;
            }
            '*' => {
                regex.push_str(&regex::escape(&literal));
                literal.clear();
                regex.push_str(".*");
            }
            '$' if pos == chars.len() - 1 => {
                regex.push_str(&regex::escape(&literal));
                literal.clear();
                regex.push('$');
                terminated = true;
            }
            _ => literal.push(ch),
        }
        pos += 1;
    }

    regex.push_str(&regex::escape(&literal));
    if !terminated {
        regex.push_str(".*");
    }

    Regex::new(&regex).map_err(|e| {
        ProxyError::robots(format!("cannot compile pattern '{}': {}", pattern, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str) -> Rule {
        Rule::new(RuleKind::Disallow, pattern).unwrap()
    }

    #[test]
    fn test_prefix_match() {
        let r = rule("/private");
        assert!(r.matches("/private"));
        assert!(r.matches("/private/data.html"));
        assert!(r.matches("/privateer"));
        assert!(!r.matches("/public/private"));
    }

    #[test]
    fn test_wildcards() {
        let r = rule("/*.php");
        assert!(r.matches("/index.php"));
        assert!(r.matches("/a/b/c.php?x=1"));
        assert!(!r.matches("/index.html"));

        let r = rule("/shop/*/cart");
        assert!(r.matches("/shop/books/cart"));
        assert!(r.matches("/shop//cart"));
        assert!(!r.matches("/shop/cart"));
    }

    #[test]
    fn test_end_anchor() {
        let r = rule("/*.pdf$");
        assert!(r.matches("/docs/report.pdf"));
        assert!(!r.matches("/docs/report.pdf?download=1"));

        let r = rule("/exact$");
        assert!(r.matches("/exact"));
        assert!(!r.matches("/exact/more"));
    }

    #[test]
    fn test_dollar_in_middle_is_literal() {
        let r = rule("/price$list");
        assert!(r.matches("/price$list"));
        assert!(r.matches("/price$list/2"));
        assert!(!r.matches("/price"));
    }

    #[test]
    fn test_escaped_metacharacters() {
        let r = rule("/a\\*b");
        assert!(r.matches("/a*b"));
        assert!(!r.matches("/axxb"));

        let r = rule("/cost\\$");
        assert!(r.matches("/cost$"));
        assert!(r.matches("/cost$/more"));
    }

    #[test]
    fn test_regex_characters_are_literal() {
        let r = rule("/search?q=(a+b)");
        assert!(r.matches("/search?q=(a+b)&page=2"));
        assert!(!r.matches("/searchXq=(aab)"));
    }

    #[test]
    fn test_empty_pattern_matches_only_empty_path() {
        let r = rule("");
        assert!(r.matches(""));
        assert!(!r.matches("/"));
        assert!(!r.matches("/anything"));
    }

    #[test]
    fn test_specificity_counts_characters() {
        assert_eq!(rule("/a*").specificity(), 3);
        assert_eq!(rule("/über").specificity(), 5);
    }
}

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use url::Url;

static REPEATED_SLASHES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/{2,}").expect("Slash pattern should be a valid regex"));

/// Canonical form of `raw`, or `None` when it is not a URL.
///
/// Lower-cases the host, drops the default port and fragment, resolves dot
/// segments, collapses repeated slashes, decodes escaped unreserved
/// characters and upper-cases the remaining escapes.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(e) => {
            debug!("Malformed URL {}: {}", trimmed, e);
            return None;
        }
    };
    url.set_fragment(None);

    if matches!(url.scheme(), "http" | "https") {
        let collapsed = REPEATED_SLASHES.replace_all(url.path(), "/").into_owned();
        let path = normalize_escapes(&collapsed);
        if path != url.path() {
            url.set_path(&path);
        }
    }

    Some(url.to_string())
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

fn hex_value(byte: u8) -> Option<u8> {
    char::from(byte).to_digit(16).map(|v| v as u8)
}

fn normalize_escapes(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = String::with_capacity(path.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                let decoded = hi * 16 + lo;
                if is_unreserved(decoded) {
                    out.push(char::from(decoded));
                } else {
                    out.push('%');
                    out.push(char::from(bytes[i + 1]).to_ascii_uppercase());
                    out.push(char::from(bytes[i + 2]).to_ascii_uppercase());
                }
                i += 3;
                continue;
            }
        }
        let ch = path[i..].chars().next().unwrap_or_default();
        out.push(ch);
        i += ch.len_utf8().max(1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_and_fragment() {
        assert_eq!(
            normalize("HTTP://Example.COM:80/a#frag").as_deref(),
            Some("http://example.com/a")
        );
        assert_eq!(
            normalize("https://example.com:443").as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(
            normalize("http://example.com:8080/").as_deref(),
            Some("http://example.com:8080/")
        );
    }

    #[test]
    fn test_path_segments() {
        assert_eq!(
            normalize("http://example.com/a/./b/../c").as_deref(),
            Some("http://example.com/a/c")
        );
        assert_eq!(
            normalize("http://example.com//a//b").as_deref(),
            Some("http://example.com/a/b")
        );
        assert_eq!(
            normalize("http://example.com/../x").as_deref(),
            Some("http://example.com/x")
        );
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            normalize("http://example.com/%7euser/%2fx%3a").as_deref(),
            Some("http://example.com/~user/%2Fx%3A")
        );
        assert_eq!(
            normalize("http://example.com/a?q=%7e").as_deref(),
            Some("http://example.com/a?q=%7e")
        );
    }

    #[test]
    fn test_rejects_non_urls() {
        assert_eq!(normalize("   "), None);
        assert_eq!(normalize("not a url"), None);
        assert_eq!(normalize("121312"), None);
    }
}

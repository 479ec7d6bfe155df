//! Wildcard matching over dotted names.
//!
//! One matcher serves both policy call sites: permission grants like
//! `browser.*` (wildcard tail, matches any deeper suffix) and hostname
//! allow-list entries like `*.example.com` (wildcard head, matches the bare
//! domain or exactly one extra leading label).

/// A dotted-name pattern, possibly carrying a single `*` at either end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    body: String,
    wildcard: Wildcard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wildcard {
    /// Exact match only.
    None,
    /// `*.suffix` — the name is `suffix` or `label.suffix` for one label.
    Leading,
    /// `prefix.*` — the name starts with `prefix.` at any depth.
    Trailing,
}

impl WildcardPattern {
    /// Parse a pattern string. Whitespace is trimmed and matching is
    /// case-insensitive (patterns are lowercased on construction).
    pub fn parse(pattern: &str) -> Self {
        let trimmed = pattern.trim().to_ascii_lowercase();

        if let Some(suffix) = trimmed.strip_prefix("*.") {
            Self {
                body: suffix.to_string(),
                wildcard: Wildcard::Leading,
            }
        } else if let Some(prefix) = trimmed.strip_suffix(".*") {
            Self {
                body: prefix.to_string(),
                wildcard: Wildcard::Trailing,
            }
        } else {
            Self {
                body: trimmed,
                wildcard: Wildcard::None,
            }
        }
    }

    /// Check whether `name` matches this pattern.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim().to_ascii_lowercase();
        if self.body.is_empty() {
            return false;
        }

        match self.wildcard {
            Wildcard::None => name == self.body,
            Wildcard::Leading => {
                if name == self.body {
                    return true;
                }
                match name.strip_suffix(&self.body) {
                    // One extra label: "sub." remains, with no further dot.
                    Some(head) => {
                        head.ends_with('.') && !head[..head.len() - 1].contains('.') && head.len() > 1
                    }
                    None => false,
                }
            }
            Wildcard::Trailing => name
                .strip_prefix(&self.body)
                .is_some_and(|tail| tail.starts_with('.') && tail.len() > 1),
        }
    }
}

/// Check a hostname against an allow-list of patterns.
///
/// An empty list matches nothing here; the caller decides what an empty
/// allow-list means for its policy.
pub fn host_allowed(hostname: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|p| WildcardPattern::parse(p).matches(hostname))
}

/// Check a required permission against a set of granted permissions.
///
/// Grants match exactly, or via a `prefix.*` wildcard covering any deeper
/// dotted suffix of the prefix.
pub fn permission_granted(granted: &[String], required: &str) -> bool {
    granted.iter().any(|g| {
        g == required || WildcardPattern::parse(g).matches(required)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_itself() {
        let p = WildcardPattern::parse("example.com");
        assert!(p.matches("example.com"));
        assert!(p.matches("EXAMPLE.COM"));
        assert!(!p.matches("sub.example.com"));
        assert!(!p.matches("example.org"));
    }

    #[test]
    fn leading_wildcard_matches_bare_domain_and_one_label() {
        let p = WildcardPattern::parse("*.example.com");
        assert!(p.matches("example.com"));
        assert!(p.matches("sub.example.com"));
        assert!(!p.matches("a.b.example.com"));
        assert!(!p.matches("notexample.com"));
        assert!(!p.matches("example.com.evil.org"));
    }

    #[test]
    fn trailing_wildcard_matches_any_depth() {
        let p = WildcardPattern::parse("browser.*");
        assert!(p.matches("browser.navigate"));
        assert!(p.matches("browser.tabs.open"));
        assert!(!p.matches("browser"));
        assert!(!p.matches("browserx.navigate"));
    }

    #[test]
    fn empty_and_bare_star_match_nothing() {
        assert!(!WildcardPattern::parse("").matches("example.com"));
        assert!(!WildcardPattern::parse("*.").matches("anything"));
    }

    #[test]
    fn host_allowed_over_mixed_patterns() {
        let patterns = vec!["*.allowed.com".to_string(), "localhost".to_string()];
        assert!(host_allowed("sub.allowed.com", &patterns));
        assert!(host_allowed("allowed.com", &patterns));
        assert!(host_allowed("localhost", &patterns));
        assert!(!host_allowed("deep.sub.allowed.com", &patterns));
        assert!(!host_allowed("denied.com", &patterns));
    }

    #[test]
    fn permission_granted_exact_and_wildcard() {
        let granted = vec!["browser.navigate".to_string(), "session.*".to_string()];
        assert!(permission_granted(&granted, "browser.navigate"));
        assert!(permission_granted(&granted, "session.create"));
        assert!(permission_granted(&granted, "session.admin.purge"));
        assert!(!permission_granted(&granted, "browser.evaluate"));
        assert!(!permission_granted(&granted, "session"));
    }
}

//! CORS origin rules.
//!
//! An allowed-origin spec is either `*`, an exact origin, or a single-`*`
//! wildcard pattern (`https://*.example.org`).

/// One parsed origin rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginRule {
    AllowAll,
    Exact(String),
    Wildcard { prefix: String, suffix: String },
}

/// Parse configured origin specs, skipping empty entries.
pub fn parse_origin_rules(specs: &[String]) -> Vec<OriginRule> {
    let mut rules = Vec::new();
    for spec in specs {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }
        if spec == "*" {
            rules.push(OriginRule::AllowAll);
        } else if let Some((prefix, suffix)) = spec.split_once('*') {
            rules.push(OriginRule::Wildcard {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            });
        } else {
            rules.push(OriginRule::Exact(spec.to_string()));
        }
    }
    rules
}

/// Whether `origin` matches any rule.
pub fn origin_allowed(rules: &[OriginRule], origin: &str) -> bool {
    rules.iter().any(|rule| match rule {
        OriginRule::AllowAll => true,
        OriginRule::Exact(exact) => origin == exact,
        OriginRule::Wildcard { prefix, suffix } => {
            origin.starts_with(prefix.as_str()) && origin.ends_with(suffix.as_str())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(specs: &[&str]) -> Vec<OriginRule> {
        parse_origin_rules(&specs.iter().map(|s| (*s).to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_exact_match() {
        let r = rules(&["https://radio.example.org"]);
        assert!(origin_allowed(&r, "https://radio.example.org"));
        assert!(!origin_allowed(&r, "https://evil.example.org"));
    }

    #[test]
    fn test_allow_all() {
        let r = rules(&["*"]);
        assert!(origin_allowed(&r, "https://anything.example"));
    }

    #[test]
    fn test_wildcard() {
        let r = rules(&["https://*.example.org"]);
        assert!(origin_allowed(&r, "https://radio.example.org"));
        assert!(origin_allowed(&r, "https://a.b.example.org"));
        assert!(!origin_allowed(&r, "http://radio.example.org"));
        assert!(!origin_allowed(&r, "https://example.com"));
    }

    #[test]
    fn test_empty_specs_allow_nothing() {
        let r = rules(&["", "  "]);
        assert!(r.is_empty());
        assert!(!origin_allowed(&r, "https://radio.example.org"));
    }
}

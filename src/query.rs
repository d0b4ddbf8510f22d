//! Normalized search queries.
//!
//! The normalized form is both the coalescing key in the dispatcher and the
//! archive directory name on disk, so two requests that differ only in case,
//! stripped punctuation, or the order of `OR` terms share one analysis and
//! one archive.

use std::fmt;

use serde::Serialize;

use crate::error::InvalidQuery;

/// Characters stripped from every query term before lowercasing.
const DENY_SET: &str = "%()*,/:;<=>?[\\]^`{|}~";

/// A search query in canonical form.
///
/// Construction goes through [`Query::parse`], which lowercases each `OR`
/// term, strips the deny-set, drops terms that come out empty, and sorts the
/// rest lexicographically. The result is stable under re-parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Query(String);

impl Query {
    /// Normalize a raw query string. Fails if nothing survives cleaning.
    pub fn parse(raw: &str) -> Result<Self, InvalidQuery> {
        let mut terms: Vec<String> = raw
            .split(" OR ")
            .map(|term| {
                term.chars()
                    .filter(|c| !DENY_SET.contains(*c))
                    .flat_map(|c| c.to_lowercase())
                    .collect::<String>()
            })
            .map(|term| term.trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();
        terms.sort();

        if terms.is_empty() {
            return Err(InvalidQuery);
        }
        Ok(Query(terms.join(" OR ")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the query selects the Gnip post schema.
    pub fn is_gnip(&self) -> bool {
        self.0.starts_with("gnip")
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Query {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_deny_set_and_lowercases() {
        let q = Query::parse("Hello, (World)?").unwrap();
        assert_eq!(q.as_str(), "hello world");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["Hillary OR clinton", "A) OR b", "  Trump OR trump ", "x"] {
            let once = Query::parse(raw).unwrap();
            let twice = Query::parse(once.as_str()).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_normalize_is_or_order_insensitive() {
        let a = Query::parse("Hillary OR clinton").unwrap();
        let b = Query::parse("CLINTON OR hillary").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "clinton OR hillary");
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(Query::parse("").is_err());
        assert!(Query::parse("()%,").is_err());
        assert!(Query::parse("   ").is_err());
    }

    #[test]
    fn test_empty_or_terms_dropped() {
        let q = Query::parse("a OR ").unwrap();
        assert_eq!(q.as_str(), "a");
    }

    #[test]
    fn test_gnip_prefix() {
        assert!(Query::parse("gnip stream").unwrap().is_gnip());
        assert!(!Query::parse("plain stream").unwrap().is_gnip());
    }
}

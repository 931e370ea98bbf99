//! Path match expressions for reindex/remove queries.

use anyhow::{Context, Result};
use regex::Regex;
use std::fmt;
use std::path::Path;

/// A user-supplied path filter: either a literal substring or a regular
/// expression. An empty pattern matches everything.
#[derive(Debug, Clone)]
pub enum PathMatch {
    Pattern(String),
    Regex(Regex),
}

impl PathMatch {
    pub fn pattern(pattern: impl Into<String>) -> Self {
        PathMatch::Pattern(pattern.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        let regex =
            Regex::new(pattern).with_context(|| format!("Invalid regex pattern: {pattern}"))?;
        Ok(PathMatch::Regex(regex))
    }

    /// Matches everything; used when a query has no filter.
    pub fn any() -> Self {
        PathMatch::Pattern(String::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PathMatch::Pattern(p) => p.is_empty(),
            PathMatch::Regex(r) => r.as_str().is_empty(),
        }
    }

    pub fn is_match(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        match self {
            PathMatch::Pattern(p) => p.is_empty() || path_str.contains(p.as_str()),
            PathMatch::Regex(r) => r.is_match(&path_str),
        }
    }
}

impl fmt::Display for PathMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathMatch::Pattern(p) => write!(f, "{p}"),
            PathMatch::Regex(r) => write!(f, "/{}/", r.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_pattern() {
        let m = PathMatch::pattern("src/foo");
        assert!(m.is_match(Path::new("/home/dev/src/foo.cpp")));
        assert!(!m.is_match(Path::new("/home/dev/src/bar.cpp")));
    }

    #[test]
    fn test_empty_pattern_matches_all() {
        let m = PathMatch::any();
        assert!(m.is_empty());
        assert!(m.is_match(Path::new("/anything/at/all")));
    }

    #[test]
    fn test_regex_pattern() {
        let m = PathMatch::regex(r"\.(h|hpp)$").unwrap();
        assert!(m.is_match(Path::new("/p/a.h")));
        assert!(m.is_match(Path::new("/p/a.hpp")));
        assert!(!m.is_match(Path::new("/p/a.cpp")));
        assert!(PathMatch::regex("[unclosed").is_err());
    }
}

//! # Matchers
//!
//! A [`Matcher`] is a predicate over a [`crate::request::Request`],
//! constructed once when a [`crate::limit::Limit`] is built from config
//! and never mutated afterwards — `matches` is a read-only, allocation-free
//! hot path. Two kinds ship today, each looked up by a tag string through a
//! small closed dispatch table rather than a dynamic registry: adding a
//! third kind is a source change, not a config-time registration.

use regex::Regex;
use serde::Deserialize;

use crate::error::{Result, SphinxError};
use crate::request::Request;

/// A predicate over a request. Built once at config-load time.
pub trait Matcher: Send + Sync {
    fn matches(&self, request: &Request) -> bool;
}

// ---------------------------------------------------------------------
// Header matcher
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HeaderMatchEntryConfig {
    name: Option<String>,
    #[serde(rename = "match")]
    pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HeaderMatcherConfig {
    match_any: Vec<HeaderMatchEntryConfig>,
}

struct HeaderMatchEntry {
    name: String,
    pattern: Option<Regex>,
}

/// Matches if *any* configured header entry matches: the header is present
/// (case-insensitive) and, when a `match` regex is given, at least one of
/// the header's values satisfies it.
pub struct HeaderMatcher {
    entries: Vec<HeaderMatchEntry>,
}

impl Matcher for HeaderMatcher {
    fn matches(&self, request: &Request) -> bool {
        for entry in &self.entries {
            let mut values = request.headers.get_all(entry.name.as_str()).iter().peekable();
            if values.peek().is_none() {
                continue;
            }
            match &entry.pattern {
                None => return true,
                Some(re) => {
                    if values.filter_map(|v| v.to_str().ok()).any(|v| re.is_match(v)) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

pub fn build_header_matcher(config: serde_yaml::Value) -> Result<Box<dyn Matcher>> {
    let config: HeaderMatcherConfig = serde_yaml::from_value(config)
        .map_err(|e| SphinxError::InvalidMatcherConfig(format!("headers: {e}")))?;

    if config.match_any.is_empty() {
        return Err(SphinxError::InvalidMatcherConfig(
            "headers: match_any must not be empty".to_string(),
        ));
    }

    let mut entries = Vec::with_capacity(config.match_any.len());
    for entry in config.match_any {
        let name = entry.name.ok_or_else(|| {
            SphinxError::InvalidMatcherConfig("headers: match_any entry missing name".to_string())
        })?;
        let pattern = match entry.pattern {
            None => None,
            Some(p) if p.is_empty() => None,
            Some(p) => Some(
                Regex::new(&p)
                    .map_err(|e| SphinxError::InvalidMatcherConfig(format!("headers: {e}")))?,
            ),
        };
        entries.push(HeaderMatchEntry { name, pattern });
    }

    Ok(Box::new(HeaderMatcher { entries }))
}

// ---------------------------------------------------------------------
// Path matcher
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PathMatcherConfig {
    match_any: Vec<String>,
}

/// Matches if the request path matches *any* of the configured regexes.
pub struct PathMatcher {
    patterns: Vec<Regex>,
}

impl Matcher for PathMatcher {
    fn matches(&self, request: &Request) -> bool {
        self.patterns.iter().any(|re| re.is_match(&request.path))
    }
}

pub fn build_path_matcher(config: serde_yaml::Value) -> Result<Box<dyn Matcher>> {
    let config: PathMatcherConfig = serde_yaml::from_value(config)
        .map_err(|e| SphinxError::InvalidMatcherConfig(format!("paths: {e}")))?;

    if config.match_any.is_empty() {
        return Err(SphinxError::InvalidMatcherConfig(
            "paths: match_any must not be empty".to_string(),
        ));
    }

    let mut patterns = Vec::with_capacity(config.match_any.len());
    for p in config.match_any {
        patterns
            .push(Regex::new(&p).map_err(|e| SphinxError::InvalidMatcherConfig(format!("paths: {e}")))?);
    }

    Ok(Box::new(PathMatcher { patterns }))
}

// ---------------------------------------------------------------------
// Factory dispatch
// ---------------------------------------------------------------------

/// Resolves a matcher tag (`"headers"`, `"paths"`) plus its config value
/// into a constructed [`Matcher`]. Unknown tags are a config error.
pub fn build_matcher(tag: &str, config: serde_yaml::Value) -> Result<Box<dyn Matcher>> {
    match tag {
        "headers" => build_header_matcher(config),
        "paths" => build_path_matcher(config),
        other => Err(SphinxError::InvalidMatcherConfig(other.to_string())),
    }
}

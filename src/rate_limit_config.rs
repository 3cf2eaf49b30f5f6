//! # Limit Config
//!
//! The typed shape of one entry under `limits:` in the YAML document
//! (§6). `keys`/`matches`/`excludes` stay as `IndexMap<String, Value>`
//! rather than further-typed structs because each entry's shape depends
//! on its tag (`headers`, `ip`, `global`, `paths`, ...), resolved later by
//! [`crate::matchers::build_matcher`] / [`crate::limit_keys::build_limit_keys`].
//! `IndexMap` (rather than `HashMap`) preserves the order entries were
//! declared in, matching the "insertion order" requirement the matcher/key
//! resolution loops rely on for deterministic error reporting — the
//! `limits` map itself at the top level carries the order requirement that
//! actually matters for bucket-name/status determinism (see `config.rs`).

use indexmap::IndexMap;
use serde::Deserialize;

fn default_map() -> IndexMap<String, serde_yaml::Value> {
    IndexMap::new()
}

/// One named rate-limiting rule as written in config.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitConfig {
    /// Window length in seconds. Must be >= 1.
    pub interval: u64,
    /// Maximum tokens per interval. Must be >= 1.
    pub max: u32,
    /// Key kind -> kind-specific config (`headers`, `ip`, `global`).
    pub keys: IndexMap<String, serde_yaml::Value>,
    /// Matcher tag -> kind-specific config. Defaults to empty (the limit
    /// applies to every non-excluded request).
    #[serde(default = "default_map")]
    pub matches: IndexMap<String, serde_yaml::Value>,
    /// Matcher tag -> kind-specific config. Defaults to empty (nothing is
    /// excluded).
    #[serde(default = "default_map")]
    pub excludes: IndexMap<String, serde_yaml::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_limit() {
        let config: LimitConfig = serde_yaml::from_str(
            "interval: 60\nmax: 100\nkeys:\n  ip: {}\n",
        )
        .unwrap();
        assert_eq!(config.interval, 60);
        assert_eq!(config.max, 100);
        assert!(config.matches.is_empty());
        assert!(config.excludes.is_empty());
    }

    #[test]
    fn parses_full_limit() {
        let config: LimitConfig = serde_yaml::from_str(
            "interval: 60\nmax: 100\nkeys:\n  headers: [authorization]\nmatches:\n  paths:\n    match_any: [\"^/api/\"]\nexcludes:\n  headers:\n    match_any: [{ name: x-internal }]\n",
        )
        .unwrap();
        assert_eq!(config.matches.len(), 1);
        assert_eq!(config.excludes.len(), 1);
    }
}

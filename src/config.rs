//! # Configuration
//!
//! Typed deserialization of the YAML document described in §6: `proxy`,
//! an optional `health-check`, `storage`, and a named `limits` map. The
//! `limits` map is an [`IndexMap`] rather than a `HashMap` so the order
//! limits were declared in survives YAML parsing — `RateLimiter::add`
//! (and therefore `Status` ordering) depends on that declared order, not
//! on alphabetical or hash order.
//!
//! Validation beyond what serde's types enforce lives in
//! [`crate::config_validator`]; this module only owns the shape and
//! loading from disk.

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

use crate::error::{Result, SphinxError};
use crate::rate_limit_config::LimitConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// `"http"` (enforcing) or `"httplogger"` (shadow).
    pub handler: String,
    /// Upstream origin, e.g. `https://upstream.example.com`.
    pub host: String,
    /// Listen address, e.g. `:8080` or `0.0.0.0:8080`.
    pub listen: String,
    #[serde(rename = "allow-on-error", default)]
    pub allow_on_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_health_endpoint")]
    pub endpoint: String,
}

fn default_health_endpoint() -> String {
    "/health".to_string()
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self { enabled: false, port: String::new(), endpoint: default_health_endpoint() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub host: Option<String>,
    pub port: Option<String>,
    pub region: Option<String>,
    pub table: Option<String>,
}

/// The full Sphinx configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(rename = "health-check", default)]
    pub health_check: HealthCheckConfig,
    pub storage: StorageConfig,
    pub limits: IndexMap<String, LimitConfig>,
}

impl Config {
    /// Reads and parses the YAML document at `path`. Does not validate —
    /// callers should run the result through [`crate::config_validator`]
    /// before acting on it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SphinxError::ConfigInvalid(format!(
                "failed to read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let config: Config = serde_yaml::from_str(&data)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
proxy:
  handler: http
  host: https://upstream.example.com
  listen: ":8080"
  allow-on-error: false

health-check:
  enabled: true
  port: "8081"
  endpoint: /health

storage:
  type: memory

limits:
  by-auth-header:
    interval: 60
    max: 100
    keys:
      headers: [authorization]
    matches:
      paths:
        match_any: ["^/api/"]
  by-ip:
    interval: 60
    max: 1000
    keys:
      ip: {}
"#;

    #[test]
    fn parses_example_document() {
        let config: Config = serde_yaml::from_str(EXAMPLE).unwrap();
        assert_eq!(config.proxy.handler, "http");
        assert!(config.health_check.enabled);
        assert_eq!(config.storage.kind, "memory");
        assert_eq!(config.limits.len(), 2);
    }

    #[test]
    fn limits_preserve_declaration_order() {
        let config: Config = serde_yaml::from_str(EXAMPLE).unwrap();
        let names: Vec<&str> = config.limits.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["by-auth-header", "by-ip"]);
    }

    #[test]
    fn health_check_defaults_to_disabled() {
        let minimal = r#"
proxy:
  handler: http
  host: https://upstream.example.com
  listen: ":8080"
storage:
  type: memory
limits:
  l:
    interval: 60
    max: 1
    keys:
      ip: {}
"#;
        let config: Config = serde_yaml::from_str(minimal).unwrap();
        assert!(!config.health_check.enabled);
    }
}

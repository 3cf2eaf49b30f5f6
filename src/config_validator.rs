//! # Config Validation
//!
//! Validation rules beyond what `serde` enforces at parse time (§6):
//! `proxy.handler` is one of the two known handlers, `proxy.host` parses
//! as a URL with a scheme, `proxy.listen` parses as `host:port`, at least
//! one limit is configured, every limit has `interval >= 1`, `max >= 1`
//! and at least one key, `storage.type` is recognized with its
//! required fields present, and an enabled health check's port differs
//! from the proxy's listen port.

use reqwest::Url;

use crate::config::Config;
use crate::error::{Result, SphinxError};

const KNOWN_HANDLERS: [&str; 2] = ["http", "httplogger"];
const KNOWN_STORAGE_TYPES: [&str; 3] = ["memory", "redis", "dynamodb"];

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a full configuration document, returning the first rule
    /// violated.
    pub fn validate(config: &Config) -> Result<()> {
        Self::validate_proxy(config)?;
        Self::validate_storage(config)?;
        Self::validate_limits(config)?;
        Self::validate_health_check(config)?;
        Ok(())
    }

    fn validate_proxy(config: &Config) -> Result<()> {
        let proxy = &config.proxy;
        if proxy.handler.is_empty() {
            return Err(SphinxError::ConfigInvalid("proxy.handler not set".to_string()));
        }
        if !KNOWN_HANDLERS.contains(&proxy.handler.as_str()) {
            return Err(SphinxError::ConfigInvalid(format!(
                "proxy.handler must be one of {:?}, got '{}'",
                KNOWN_HANDLERS, proxy.handler
            )));
        }
        if proxy.host.is_empty() {
            return Err(SphinxError::ConfigInvalid("proxy.host not set".to_string()));
        }
        let url = Url::parse(&proxy.host)
            .map_err(|e| SphinxError::ConfigInvalid(format!("proxy.host is not a valid URL: {e}")))?;
        if url.scheme().is_empty() {
            return Err(SphinxError::ConfigInvalid(
                "proxy.host must include a scheme (e.g. https://)".to_string(),
            ));
        }
        Self::parse_listen_port(&proxy.listen)?;
        Ok(())
    }

    fn validate_storage(config: &Config) -> Result<()> {
        let storage = &config.storage;
        if !KNOWN_STORAGE_TYPES.contains(&storage.kind.as_str()) {
            return Err(SphinxError::UnknownStorage(storage.kind.clone()));
        }
        match storage.kind.as_str() {
            "redis" => {
                if storage.host.is_none() {
                    return Err(SphinxError::ConfigInvalid("storage.host required for redis".to_string()));
                }
                if storage.port.is_none() {
                    return Err(SphinxError::ConfigInvalid("storage.port required for redis".to_string()));
                }
            }
            "dynamodb" => {
                if storage.region.is_none() {
                    return Err(SphinxError::ConfigInvalid("storage.region required for dynamodb".to_string()));
                }
                if storage.table.is_none() {
                    return Err(SphinxError::ConfigInvalid("storage.table required for dynamodb".to_string()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn validate_limits(config: &Config) -> Result<()> {
        if config.limits.is_empty() {
            return Err(SphinxError::ConfigInvalid("no limits defined".to_string()));
        }
        for (name, limit) in &config.limits {
            if limit.interval < 1 {
                return Err(SphinxError::ConfigInvalid(format!(
                    "interval must be set >= 1 for limit: {name}"
                )));
            }
            if limit.max < 1 {
                return Err(SphinxError::ConfigInvalid(format!(
                    "max must be set >= 1 for limit: {name}"
                )));
            }
            if limit.keys.is_empty() {
                return Err(SphinxError::ConfigInvalid(format!(
                    "must set at least one key for limit: {name}"
                )));
            }
        }
        Ok(())
    }

    fn validate_health_check(config: &Config) -> Result<()> {
        if !config.health_check.enabled {
            return Ok(());
        }
        let health_port = config.health_check.port.trim_start_matches(':');
        let listen_port = Self::parse_listen_port(&config.proxy.listen)?;
        if health_port == listen_port {
            return Err(SphinxError::ConfigInvalid(
                "health-check.port must differ from proxy.listen's port".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses the port out of a `host:port` or `:port` listen address.
    fn parse_listen_port(listen: &str) -> Result<String> {
        let port = listen
            .rsplit(':')
            .next()
            .filter(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| {
                SphinxError::ConfigInvalid(format!(
                    "invalid proxy.listen '{listen}'. Should be like host:port or :port"
                ))
            })?;
        Ok(port.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    const BASE: &str = r#"
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

    #[test]
    fn valid_config_passes() {
        assert!(ConfigValidator::validate(&config_from(BASE)).is_ok());
    }

    #[test]
    fn rejects_unknown_handler() {
        let config = config_from(&BASE.replace("handler: http", "handler: nope"));
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn rejects_host_without_scheme() {
        let config = config_from(&BASE.replace(
            "host: https://upstream.example.com",
            "host: upstream.example.com",
        ));
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn rejects_invalid_listen() {
        let config = config_from(&BASE.replace("listen: \":8080\"", "listen: \"not-a-port\""));
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn rejects_empty_limits() {
        let yaml = r#"
proxy:
  handler: http
  host: https://upstream.example.com
  listen: ":8080"
storage:
  type: memory
limits: {}
"#;
        let config = config_from(yaml);
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn rejects_unknown_storage_type() {
        let config = config_from(&BASE.replace("type: memory", "type: postgres"));
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(SphinxError::UnknownStorage(_))
        ));
    }

    #[test]
    fn redis_storage_requires_host_and_port() {
        let yaml = BASE.replace("type: memory", "type: redis");
        let config = config_from(&yaml);
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn rejects_health_check_port_colliding_with_listen() {
        let yaml = format!(
            "{BASE}health-check:\n  enabled: true\n  port: \"8080\"\n  endpoint: /health\n"
        );
        let config = config_from(&yaml);
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn accepts_health_check_with_distinct_port() {
        let yaml = format!(
            "{BASE}health-check:\n  enabled: true\n  port: \"8081\"\n  endpoint: /health\n"
        );
        let config = config_from(&yaml);
        assert!(ConfigValidator::validate(&config).is_ok());
    }
}

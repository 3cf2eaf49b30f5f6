//! # Limit Keys
//!
//! A [`LimitKey`] turns a [`Request`] into a string fragment, so that a
//! single configured [`crate::limit::Limit`] can partition into many
//! independent buckets (one per distinct API key, one per client IP, ...).
//! Three kinds exist, matching the closed taxonomy in the spec: `Header`,
//! `Ip`, `Global`. A key that finds nothing to key on returns
//! [`SphinxError::EmptyKey`] — a sentinel, not a failure, handled by
//! [`crate::limit::Limit::bucket_name`] by simply contributing no fragment.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, SphinxError};
use crate::request::Request;

type HmacSha256 = Hmac<Sha256>;

/// A tagged key kind, resolved once at config-load time.
#[derive(Debug, Clone)]
pub enum LimitKey {
    Header { name: String, salt: Option<String> },
    Ip,
    Global,
}

impl LimitKey {
    /// Produces this key's fragment for `request`, or `EmptyKey` if the
    /// request has nothing for this key to key on.
    pub fn key(&self, request: &Request) -> Result<String> {
        match self {
            LimitKey::Header { name, salt } => header_key(request, name, salt.as_deref()),
            LimitKey::Ip => ip_key(request),
            LimitKey::Global => Ok(GLOBAL_KEY.to_string()),
        }
    }
}

const GLOBAL_KEY: &str = "global:singleton-key";

fn header_key(request: &Request, name: &str, salt: Option<&str>) -> Result<String> {
    let Some(joined) = request.header_values_joined(name) else {
        return Err(SphinxError::EmptyKey);
    };

    let value = match salt {
        Some(salt) if !salt.is_empty() => {
            let mut mac = HmacSha256::new_from_slice(salt.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(joined.as_bytes());
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
        }
        _ => joined,
    };

    Ok(format!("{name}:{value}"))
}

fn ip_key(request: &Request) -> Result<String> {
    match &request.remote_addr {
        Some(addr) => Ok(format!("ip:{addr}")),
        None => Err(SphinxError::EmptyKey),
    }
}

// ---------------------------------------------------------------------
// Config resolution
// ---------------------------------------------------------------------

/// `keys.headers` config: either a bare list of header names, or
/// `{ names: [...], encrypt: <salt> }`.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum HeaderKeysConfig {
    Names(Vec<String>),
    Detailed { names: Vec<String>, encrypt: Option<String> },
}

/// Resolves one `keys` config entry (`headers`, `ip`, or `global`) into
/// zero or more [`LimitKey`]s. Unknown kinds are a config error.
pub fn build_limit_keys(kind: &str, config: serde_yaml::Value) -> Result<Vec<LimitKey>> {
    match kind {
        "headers" => {
            let config: HeaderKeysConfig = serde_yaml::from_value(config)
                .map_err(|e| SphinxError::ConfigInvalid(format!("keys.headers: {e}")))?;
            let (mut names, salt) = match config {
                HeaderKeysConfig::Names(names) => (names, None),
                HeaderKeysConfig::Detailed { names, encrypt } => (names, encrypt),
            };
            // Sorted so the bucket name is stable regardless of the order
            // these names were authored in the config.
            names.sort();
            Ok(names
                .into_iter()
                .map(|name| LimitKey::Header { name, salt: salt.clone() })
                .collect())
        }
        "ip" => Ok(vec![LimitKey::Ip]),
        "global" => Ok(vec![LimitKey::Global]),
        other => Err(SphinxError::ConfigInvalid(format!(
            "unknown limit key kind: {other}"
        ))),
    }
}

//! # Forwarder
//!
//! The injected reverse-proxy transport (§6). Rust has no zero-config
//! stdlib analogue of Go's `httputil.ReverseProxy`, so this crate
//! supplies one directly via `reqwest`, grounded on the
//! `reqwest`-based proxy pattern used elsewhere in the retrieval pack
//! (a client builder with explicit `user_agent`, header passthrough, and
//! timeout configuration). The handler never constructs its own
//! transport — it only ever holds an `Arc<dyn Forwarder>`.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};

use crate::error::{Result, SphinxError};

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// The upstream's response, carried back to the handler for passthrough.
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// An abstract reverse-proxy transport. The handler depends only on this
/// trait, never on a concrete HTTP client.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        method: Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ForwardedResponse>;
}

/// A `reqwest`-backed forwarder that rewrites scheme/host to a fixed
/// upstream origin, joins paths with single-slash semantics, and forwards
/// `User-Agent` exactly as given (defaulting to empty so no library
/// default leaks to the upstream).
pub struct ReqwestForwarder {
    client: reqwest::Client,
    upstream: reqwest::Url,
}

impl ReqwestForwarder {
    pub fn new(upstream_host: &str) -> Result<Self> {
        let upstream = reqwest::Url::parse(upstream_host)
            .map_err(|e| SphinxError::ConfigInvalid(format!("invalid proxy.host: {e}")))?;
        let client = reqwest::Client::builder()
            .connect_timeout(DIAL_TIMEOUT)
            // reqwest has no separate TLS-handshake-only timeout; the
            // connect timeout covers TCP connect + TLS handshake, so we
            // widen it to also bound the slower of the two phases.
            .timeout(DIAL_TIMEOUT + TLS_HANDSHAKE_TIMEOUT)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .user_agent("")
            .build()
            .map_err(SphinxError::from)?;
        Ok(Self { client, upstream })
    }

    /// Joins the upstream's base path with the incoming request path using
    /// single-slash semantics: no doubled or missing slash at the join.
    fn join_url(&self, path: &str) -> reqwest::Url {
        let mut url = self.upstream.clone();
        let base = url.path().trim_end_matches('/');
        let suffix = path.trim_start_matches('/');
        url.set_path(&format!("{base}/{suffix}"));
        url
    }
}

#[async_trait]
impl Forwarder for ReqwestForwarder {
    async fn forward(
        &self,
        method: Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ForwardedResponse> {
        let url = self.join_url(path);
        let mut request = self.client.request(method, url);

        for (name, value) in headers {
            // Host is rewritten to the upstream by reqwest itself; forward
            // everything else verbatim, including an absent User-Agent
            // (reqwest won't inject its own default since we set "" above).
            if name == axum::http::header::HOST {
                continue;
            }
            request = request.header(name, value);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(SphinxError::from)?;

        let status = response.status();
        let mut headers = HeaderMap::new();
        for (name, value) in response.headers() {
            headers.insert(name, value.clone());
        }
        let body = response.bytes().await.map_err(SphinxError::from)?;

        Ok(ForwardedResponse { status, headers, body })
    }
}

//! # Sphinx - A Rate-Limiting HTTP Reverse Proxy
//!
//! Sphinx sits in front of an upstream service and rate limits requests
//! against a set of declaratively configured `Limit`s before forwarding
//! them on. A request may match zero, one, or several limits; each match
//! consumes from its own named bucket, and the first bucket to fill
//! stops the chain.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐     ┌───────────────────────────┐     ┌─────────────┐
//! │   Client    │────▶│       Sphinx Daemon        │────▶│  Upstream   │
//! └─────────────┘     │                             │     └─────────────┘
//!                     │  Handler → RateLimiter      │
//!                     │      → Limit (× N)          │
//!                     │           → Matcher         │
//!                     │           → LimitKey (× N)  │
//!                     │           → BucketStore     │
//!                     └───────────────┬─────────────┘
//!                                     ▼
//!                          ┌─────────────────────┐
//!                          │ in-memory  |  Redis  │
//!                          └─────────────────────┘
//! ```
//!
//! ## Request Flow
//!
//! 1. The [`handler`] assigns an `X-Request-Id` if the client didn't send one.
//! 2. The request is reduced to a transport-independent [`request::Request`].
//! 3. [`rate_limiter::RateLimiter::add`] runs every matching [`limit::Limit`]
//!    in declared order, composing a bucket name from its [`limit_keys::LimitKey`]s.
//! 4. On `BucketFull` the enforcing handler returns `429` with
//!    `X-Ratelimit-*` headers; the shadow handler always forwards.
//! 5. [`forwarder::Forwarder`] proxies the request to the configured upstream.
//!
//! ## Module Organization
//!
//! - [`config`] / [`config_validator`] - typed YAML configuration and validation
//! - [`error`] - the crate's error taxonomy
//! - [`request`] - the transport-independent request view
//! - [`matchers`] - header/path predicates used by `matches`/`excludes`
//! - [`limit_keys`] - bucket-name fragment derivation (header, IP, global)
//! - [`rate_limit_config`] - the YAML shape of a single limit
//! - [`limit`] - a single configured limit
//! - [`rate_limiter`] - the ordered collection of limits evaluated per request
//! - [`bucket_store`] - the leaky/fixed-window bucket abstraction (memory, Redis)
//! - [`forwarder`] - the injected reverse-proxy transport
//! - [`handler`] - the enforcing and shadow HTTP handlers
//! - [`health`] - the standalone liveness endpoint
//! - [`daemon`] - listener lifecycle, reload, graceful shutdown

pub mod bucket_store;
pub mod config;
pub mod config_validator;
pub mod daemon;
pub mod error;
pub mod forwarder;
pub mod handler;
pub mod health;
pub mod limit;
pub mod limit_keys;
pub mod matchers;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod request;

pub use config::Config;
pub use error::{Result, SphinxError};
pub use rate_limiter::RateLimiter;
pub use request::Request;

/// Version of the sphinx library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! # Error Types and Handling
//!
//! This module defines the error taxonomy for Sphinx and, where an error
//! escapes all the way out to an HTTP response, its mapping to a status
//! code.
//!
//! ## Error → HTTP Status Mapping
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    SphinxError Variant → HTTP Status                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  BucketFull                   │  429 Too Many Requests (handler-mapped) │
//! │  EmptyKey                     │  never surfaced — sentinel, not error   │
//! │  ConfigInvalid                │  fatal at startup / rejected on reload  │
//! │  InvalidMatcherConfig(tag)     │  fatal to the config load that owns it  │
//! │  UnknownStorage(tag)          │  fatal at startup                       │
//! │  StoreTransient               │  handler applies allow_on_error         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `BucketFull` and `EmptyKey` are expected control-flow signals rather than
//! failures: `BucketFull` is how a limit reports "no room left" and
//! `EmptyKey` is how a limit key reports "this request has nothing to key
//! on" — neither indicates anything went wrong.

use std::fmt;

/// All errors that can occur while evaluating or configuring Sphinx.
#[derive(Debug, Clone)]
pub enum SphinxError {
    /// The bucket addressed by this request has no remaining capacity.
    BucketFull,

    /// A limit key found nothing on the request to key on (e.g. a header
    /// key whose header is absent). Not a failure — the key simply
    /// contributes no fragment to the bucket name.
    EmptyKey,

    /// Configuration failed validation. Fatal at startup; on reload the
    /// previous configuration is retained.
    ConfigInvalid(String),

    /// A matcher's configuration is malformed, naming the matcher tag.
    InvalidMatcherConfig(String),

    /// `storage.type` named a backend Sphinx doesn't recognize (or
    /// recognizes but doesn't implement, e.g. `dynamodb`).
    UnknownStorage(String),

    /// A store operation failed for a reason other than being full
    /// (Redis connectivity, protocol error, etc).
    StoreTransient(String),

    /// An upstream forwarding attempt failed at the transport level.
    ForwardError(String),

    /// Catch-all for I/O and other unexpected failures.
    Internal(String),
}

impl fmt::Display for SphinxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SphinxError::BucketFull => write!(f, "bucket is full"),
            SphinxError::EmptyKey => write!(f, "request has no value for this limit key"),
            SphinxError::ConfigInvalid(msg) => write!(f, "invalid configuration: {}", msg),
            SphinxError::InvalidMatcherConfig(tag) => {
                write!(f, "invalid matcher configuration for '{}'", tag)
            }
            SphinxError::UnknownStorage(tag) => write!(f, "unknown storage type '{}'", tag),
            SphinxError::StoreTransient(msg) => write!(f, "bucket store error: {}", msg),
            SphinxError::ForwardError(msg) => write!(f, "error forwarding request: {}", msg),
            SphinxError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for SphinxError {}

impl From<redis::RedisError> for SphinxError {
    fn from(err: redis::RedisError) -> Self {
        SphinxError::StoreTransient(err.to_string())
    }
}

impl From<serde_yaml::Error> for SphinxError {
    fn from(err: serde_yaml::Error) -> Self {
        SphinxError::ConfigInvalid(err.to_string())
    }
}

impl From<std::io::Error> for SphinxError {
    fn from(err: std::io::Error) -> Self {
        SphinxError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for SphinxError {
    fn from(err: reqwest::Error) -> Self {
        SphinxError::ForwardError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SphinxError>;

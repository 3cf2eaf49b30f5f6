//! # Rate Limiter
//!
//! The `RateLimiter` holds an ordered collection of [`Limit`]s built from
//! configuration and, for each request, runs every matching limit in
//! declared order, collecting a [`Status`] per match. Grounded on the
//! original `ratelimiter.rateLimiter`: statuses are appended *before* the
//! per-limit error is checked, and a single `BucketFull` stops evaluation
//! of any remaining limits — the caller still gets headers for the bucket
//! that just filled.

use std::sync::Arc;
use std::time::SystemTime;

use crate::bucket_store::{build_bucket_store, BucketState, BucketStore};
use crate::config::Config;
use crate::error::Result;
use crate::limit::{build_limit, Limit};
use crate::request::Request;

/// A single limit's outcome, reported back to the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub name: String,
    pub capacity: u32,
    pub remaining: u32,
    pub reset: SystemTime,
}

impl Status {
    fn new(name: &str, state: BucketState) -> Self {
        Self {
            name: name.to_string(),
            capacity: state.capacity,
            remaining: state.remaining,
            reset: state.reset,
        }
    }
}

/// An ordered collection of [`Limit`]s evaluated against every request.
pub struct RateLimiter {
    limits: Vec<Limit>,
}

impl RateLimiter {
    /// Builds a `RateLimiter` from a validated [`Config`]: resolves the
    /// bucket store once, then builds each limit in declared order.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn BucketStore> = build_bucket_store(&config.storage).await?;
        let mut limits = Vec::with_capacity(config.limits.len());
        for (name, limit_config) in &config.limits {
            limits.push(build_limit(name.clone(), limit_config, store.clone())?);
        }
        Ok(Self { limits })
    }

    /// Builds a `RateLimiter` directly from already-constructed limits,
    /// bypassing config loading. Used by tests that need a hand-built
    /// `Limit` (e.g. one backed by a stubbed `BucketStore`).
    pub fn from_limits(limits: Vec<Limit>) -> Self {
        Self { limits }
    }

    /// Runs every matching limit in declared order. Appends a `Status`
    /// for each limit evaluated *before* inspecting its result, so the
    /// limit that fails — `BucketFull` or otherwise — still contributes
    /// its state to the returned statuses; any limits after it are never
    /// evaluated.
    ///
    /// Returns both the statuses collected so far and the outcome,
    /// rather than a plain `Result`, because the HTTP handler needs the
    /// statuses to emit rate-limit headers even when the call ultimately
    /// errored.
    pub async fn add(&self, request: &Request) -> (Vec<Status>, Result<()>) {
        let mut statuses = Vec::new();
        for limit in &self.limits {
            if !limit.matches(request) {
                continue;
            }
            match limit.add(request).await {
                Ok(state) => statuses.push(Status::new(limit.name(), state)),
                Err((err, state)) => {
                    statuses.push(Status::new(limit.name(), state));
                    return (statuses, Err(err));
                }
            }
        }
        (statuses, Ok(()))
    }
}

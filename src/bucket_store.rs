//! # Bucket Store
//!
//! This module implements the leaky/fixed-window bucket contract that
//! backs every [`crate::limit::Limit`]: a named counter that resets in
//! whole intervals, never by smoothed refill.
//!
//! ## Bucket semantics
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          Bucket                                 │
//! ├────────────────────────────────────────────────────────────────┤
//! │  capacity   max tokens the bucket can hold                      │
//! │  remaining  tokens left in the current interval                 │
//! │  reset      when the current interval ends                      │
//! │  rate       interval length                                     │
//! │                                                                  │
//! │  add(n):                                                        │
//! │    if now > reset:  remaining = capacity; reset = now + rate     │
//! │    if n > remaining: return BucketFull (state still returned)    │
//! │    remaining -= n                                                │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is deliberately no proportional refill between resets — a
//! bucket is either in its current interval (whatever remains, remains)
//! or past it (fully reset on next touch). Two backends implement the
//! same [`BucketStore`] contract: an in-memory store for single-process
//! deployments and a Redis store for multi-process/multi-host
//! deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::error::{Result, SphinxError};

/// A point-in-time snapshot of a bucket, returned from every `create`/`add`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub capacity: u32,
    pub remaining: u32,
    pub reset: SystemTime,
}

impl Default for BucketState {
    /// The zero-value state reported when a limit fails before a bucket
    /// even exists (e.g. the store itself is unreachable) — mirrors the
    /// original's zero-value `BucketState{}` returned alongside a
    /// `storage.Create` error.
    fn default() -> Self {
        Self { capacity: 0, remaining: 0, reset: SystemTime::now() }
    }
}

/// The outcome of [`Bucket::add`]: the state always accompanies the
/// result, success or failure, matching the original `(BucketState,
/// error)` return shape — a caller that got `BucketFull` still needs
/// `remaining`/`reset` to answer the request with correct headers.
pub type AddOutcome = std::result::Result<BucketState, (SphinxError, BucketState)>;

/// A single named counter. Implementations must treat `add` as the only
/// mutating operation and must serialize concurrent `add` calls against
/// the same bucket.
#[async_trait]
pub trait Bucket: Send + Sync {
    fn capacity(&self) -> u32;
    async fn add(&self, amount: u32) -> AddOutcome;
}

/// A find-or-create factory for named [`Bucket`]s.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Finds the bucket for `name`, or creates one with the given
    /// `capacity`/`rate` if none exists yet. An already in-flight bucket
    /// keeps its original parameters regardless of what's passed here.
    async fn create(&self, name: &str, capacity: u32, rate: Duration) -> Result<Arc<dyn Bucket>>;
}

// ---------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------

struct MemoryBucketInner {
    capacity: u32,
    remaining: u32,
    reset: SystemTime,
    rate: Duration,
}

/// A single in-memory bucket, guarded by its own mutex so that `add`
/// calls against different buckets never contend with one another.
pub struct MemoryBucket {
    inner: Mutex<MemoryBucketInner>,
}

impl MemoryBucket {
    fn new(capacity: u32, rate: Duration) -> Self {
        Self {
            inner: Mutex::new(MemoryBucketInner {
                capacity,
                remaining: capacity,
                reset: SystemTime::now() + rate,
                rate,
            }),
        }
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    fn capacity(&self) -> u32 {
        self.inner.lock().expect("bucket mutex poisoned").capacity
    }

    async fn add(&self, amount: u32) -> AddOutcome {
        let mut inner = self.inner.lock().expect("bucket mutex poisoned");

        if SystemTime::now() > inner.reset {
            inner.remaining = inner.capacity;
            inner.reset = SystemTime::now() + inner.rate;
        }

        let state = BucketState {
            capacity: inner.capacity,
            remaining: inner.remaining,
            reset: inner.reset,
        };

        if amount > inner.remaining {
            return Err((SphinxError::BucketFull, state));
        }

        inner.remaining -= amount;
        Ok(BucketState {
            remaining: inner.remaining,
            ..state
        })
    }
}

/// An in-memory, process-local bucket store. Find-or-create and
/// concurrent adds against distinct buckets are lock-free with respect
/// to one another: the map lock is held only long enough to look up or
/// insert the bucket's `Arc`, never across an `add`.
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, Arc<MemoryBucket>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn create(&self, name: &str, capacity: u32, rate: Duration) -> Result<Arc<dyn Bucket>> {
        let mut buckets = self.buckets.lock().expect("bucket map mutex poisoned");
        if let Some(existing) = buckets.get(name) {
            return Ok(existing.clone() as Arc<dyn Bucket>);
        }
        let bucket = Arc::new(MemoryBucket::new(capacity, rate));
        buckets.insert(name.to_string(), bucket.clone());
        Ok(bucket as Arc<dyn Bucket>)
    }
}

// ---------------------------------------------------------------------
// Redis store
// ---------------------------------------------------------------------

mod redis_pool {
    use redis::aio::MultiplexedConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

    /// A small bounded pool of multiplexed Redis connections. Acquiring
    /// a connection blocks (async) until a permit is free, matching the
    /// "acquire/release per operation" contract described for the Redis
    /// bucket store.
    pub struct Pool {
        connections: Vec<Mutex<MultiplexedConnection>>,
        semaphore: Arc<Semaphore>,
        next: AtomicUsize,
    }

    pub struct Lease<'a> {
        _permit: SemaphorePermit<'a>,
        conn: &'a Mutex<MultiplexedConnection>,
    }

    impl<'a> Lease<'a> {
        pub async fn get(&self) -> tokio::sync::MutexGuard<'_, MultiplexedConnection> {
            self.conn.lock().await
        }
    }

    impl Pool {
        pub async fn new(client: &redis::Client, size: usize) -> redis::RedisResult<Self> {
            let mut connections = Vec::with_capacity(size);
            for _ in 0..size {
                connections.push(Mutex::new(client.get_multiplexed_tokio_connection().await?));
            }
            Ok(Self {
                connections,
                semaphore: Arc::new(Semaphore::new(size)),
                next: AtomicUsize::new(0),
            })
        }

        pub async fn acquire(&self) -> Lease<'_> {
            let permit = self
                .semaphore
                .acquire()
                .await
                .expect("bucket connection semaphore closed");
            // Round-robin over the fixed connection set; any free slot works
            // since each connection is itself behind its own mutex, so the
            // permit only bounds concurrency, not which connection is used.
            let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
            Lease { _permit: permit, conn: &self.connections[idx] }
        }
    }
}

use redis::AsyncCommands;
use redis_pool::Pool;

/// A Redis-backed bucket store for multi-process deployments.
///
/// The key for a bucket is the bucket name, verbatim. `add` performs a
/// `GET` then, if it would fit, an `INCRBY` followed by a `PEXPIRE` on
/// the first increment (the call whose result equals the increment
/// amount, i.e. the key didn't exist before this call). This is
/// intentionally **not atomic**: the check and the increment are two
/// separate round-trips, so two concurrent callers can both pass the
/// check before either increments, oversubscribing the bucket by a
/// bounded amount. This is an accepted, documented compromise (see
/// `DESIGN.md`) rather than a bug — a stricter Lua-script variant could
/// close the race without changing any other externally observable
/// behavior.
pub struct RedisStore {
    pool: Arc<Pool>,
}

impl RedisStore {
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self> {
        let client = redis::Client::open(url).map_err(SphinxError::from)?;
        let pool = Pool::new(&client, pool_size.max(1))
            .await
            .map_err(SphinxError::from)?;
        Ok(Self { pool: Arc::new(pool) })
    }
}

struct RedisBucket {
    name: String,
    capacity: u32,
    rate: Duration,
    pool: Arc<Pool>,
}

#[async_trait]
impl Bucket for RedisBucket {
    fn capacity(&self) -> u32 {
        self.capacity
    }

    async fn add(&self, amount: u32) -> AddOutcome {
        let lease = self.pool.acquire().await;
        let mut conn = lease.get().await;

        // Best-effort state for a connection-level failure: we haven't
        // read anything back yet, so report the bucket as fresh rather
        // than guessing at a remaining count we never observed.
        let fallback_state = || BucketState {
            capacity: self.capacity,
            remaining: self.capacity,
            reset: SystemTime::now() + self.rate,
        };

        let count: Option<u64> = match conn.get(&self.name).await {
            Ok(count) => count,
            Err(e) => return Err((SphinxError::from(e), fallback_state())),
        };
        let count = count.unwrap_or(0);
        let remaining = self.capacity - (count as u32).min(self.capacity);

        if amount as u64 > remaining as u64 {
            // Still refresh our view of the TTL so the returned state's
            // reset time is accurate, even though the add itself failed.
            let reset = self
                .refresh_reset(&mut conn)
                .await
                .unwrap_or(None)
                .unwrap_or_else(|| SystemTime::now() + self.rate);
            let state = BucketState {
                capacity: self.capacity,
                remaining,
                reset,
            };
            return Err((SphinxError::BucketFull, state));
        }

        let rate_ms = self.rate.as_millis() as i64;
        let new_count: u64 = match conn.incr(&self.name, amount).await {
            Ok(new_count) => new_count,
            Err(e) => {
                let state = BucketState { capacity: self.capacity, remaining, reset: SystemTime::now() + self.rate };
                return Err((SphinxError::from(e), state));
            }
        };
        if new_count == amount as u64 {
            if let Err(e) = conn.pexpire::<_, ()>(&self.name, rate_ms).await {
                let new_remaining = self.capacity - (new_count as u32).min(self.capacity);
                let state = BucketState { capacity: self.capacity, remaining: new_remaining, reset: SystemTime::now() + self.rate };
                return Err((SphinxError::from(e), state));
            }
        }

        let reset = self.refresh_reset(&mut conn).await.unwrap_or(None).unwrap_or_else(|| SystemTime::now() + self.rate);
        let new_remaining = self.capacity - (new_count as u32).min(self.capacity);

        Ok(BucketState {
            capacity: self.capacity,
            remaining: new_remaining,
            reset,
        })
    }
}

impl RedisBucket {
    async fn refresh_reset(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<Option<SystemTime>> {
        let ttl_ms: i64 = conn.pttl(&self.name).await.map_err(SphinxError::from)?;
        if ttl_ms < 0 {
            return Ok(None);
        }
        Ok(Some(SystemTime::now() + Duration::from_millis(ttl_ms as u64)))
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn create(&self, name: &str, capacity: u32, rate: Duration) -> Result<Arc<dyn Bucket>> {
        // Redis has no separate "create" step beyond knowing the name;
        // the bucket's state lives entirely in the key itself, so this
        // just wraps a handle with the caller's capacity/rate and the
        // store's shared connection pool. If the key already carries a
        // different history, the next `add` reads its real count/TTL
        // regardless of what's passed here.
        Ok(Arc::new(RedisBucket {
            name: name.to_string(),
            capacity,
            rate,
            pool: self.pool.clone(),
        }) as Arc<dyn Bucket>)
    }
}

/// Default number of pooled Redis connections per `RedisStore`.
const DEFAULT_REDIS_POOL_SIZE: usize = 10;

/// Resolves `storage.type` into the matching [`BucketStore`]
/// implementation. `dynamodb` is a recognized, validated config tag with
/// no implementation (§4.1) — selecting it is a startup error.
pub async fn build_bucket_store(config: &crate::config::StorageConfig) -> Result<Arc<dyn BucketStore>> {
    match config.kind.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "redis" => {
            let host = config
                .host
                .as_deref()
                .ok_or_else(|| SphinxError::ConfigInvalid("storage.host required for redis".to_string()))?;
            let port = config
                .port
                .as_deref()
                .ok_or_else(|| SphinxError::ConfigInvalid("storage.port required for redis".to_string()))?;
            let url = format!("redis://{host}:{port}");
            let store = RedisStore::connect(&url, DEFAULT_REDIS_POOL_SIZE).await?;
            Ok(Arc::new(store))
        }
        other => Err(SphinxError::UnknownStorage(other.to_string())),
    }
}

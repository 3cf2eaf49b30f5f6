//! End-to-end tests driving the full request pipeline over a real socket:
//! HTTP request in, through `RateLimiter` + `Handler`, to a mock
//! `Forwarder` standing in for the upstream. These exercise the seed
//! scenarios from the spec's testable-properties section.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::Router;
use reqwest::Client;
use tokio::sync::RwLock;

use throttler::bucket_store::BucketStore;
use throttler::config::Config;
use throttler::forwarder::{ForwardedResponse, Forwarder};
use throttler::handler::{self, Handler, Mode};
use throttler::rate_limiter::RateLimiter;

/// A `Forwarder` stand-in that always returns a fixed status and counts
/// how many times it was invoked, so tests can assert the upstream was
/// (or wasn't) actually called.
struct MockForwarder {
    status: StatusCode,
    calls: AtomicUsize,
}

impl MockForwarder {
    fn new(status: StatusCode) -> Arc<Self> {
        Arc::new(Self { status, calls: AtomicUsize::new(0) })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Forwarder for MockForwarder {
    async fn forward(
        &self,
        _method: Method,
        _path: &str,
        _headers: &HeaderMap,
        _body: axum::body::Bytes,
    ) -> throttler::Result<ForwardedResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ForwardedResponse {
            status: self.status,
            headers: HeaderMap::new(),
            body: axum::body::Bytes::new(),
        })
    }
}

fn config_from(yaml: &str) -> Config {
    serde_yaml::from_str(yaml).unwrap()
}

/// Binds an ephemeral port, serves `handler` there, and returns the base
/// URL the test can drive with `reqwest`. The server task is detached
/// and dies with the test process.
async fn spawn_server(handler: Handler) -> String {
    let state = Arc::new(RwLock::new(Arc::new(handler)));
    let app = Router::new().fallback(handler::serve).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Scenario 6: `max=1, interval=60`. First request propagates 200 plus
/// `X-Ratelimit-Remaining: 0`; the second returns 429 with
/// `X-Ratelimit-Remaining: 0` and never reaches the upstream.
#[tokio::test]
async fn enforcing_handler_blocks_second_request_over_limit() {
    let config = config_from(
        "proxy:\n  handler: http\n  host: https://upstream.example.com\n  listen: \":0\"\nstorage:\n  type: memory\nlimits:\n  l:\n    interval: 60\n    max: 1\n    keys:\n      global: {}\n",
    );
    let rate_limiter = RateLimiter::from_config(&config).await.unwrap();
    let forwarder = MockForwarder::new(StatusCode::OK);
    let handler = Handler::new(rate_limiter, forwarder.clone(), Mode::Enforcing { allow_on_error: false });
    let base_url = spawn_server(handler).await;
    let client = Client::new();

    let response = client.get(format!("{base_url}/resource")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "0");
    assert_eq!(forwarder.call_count(), 1);

    let response = client.get(format!("{base_url}/resource")).send().await.unwrap();
    assert_eq!(response.status(), 429);
    assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "0");
    // Upstream must not have been invoked for the rejected request.
    assert_eq!(forwarder.call_count(), 1);
}

/// Distinct header values partition into distinct buckets (scenarios 1-2).
#[tokio::test]
async fn enforcing_handler_partitions_by_header_key() {
    let config = config_from(
        "proxy:\n  handler: http\n  host: https://upstream.example.com\n  listen: \":0\"\nstorage:\n  type: memory\nlimits:\n  l:\n    interval: 100\n    max: 3\n    keys:\n      headers: [Authorization]\n",
    );
    let rate_limiter = RateLimiter::from_config(&config).await.unwrap();
    let forwarder = MockForwarder::new(StatusCode::OK);
    let handler = Handler::new(rate_limiter, forwarder, Mode::Enforcing { allow_on_error: false });
    let base_url = spawn_server(handler).await;
    let client = Client::new();

    for expected_remaining in ["2", "1", "0"] {
        let response = client
            .get(format!("{base_url}/r"))
            .header("Authorization", "Basic 12345")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get("x-ratelimit-remaining").unwrap(),
            expected_remaining
        );
    }

    // Fourth request on the same key is over limit.
    let response = client
        .get(format!("{base_url}/r"))
        .header("Authorization", "Basic 12345")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);

    // A different Authorization value gets its own bucket.
    let response = client
        .get(format!("{base_url}/r"))
        .header("Authorization", "Basic ABC")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "2");
}

/// Shadow mode always forwards, even when a limit is exhausted, and
/// never writes rate-limit headers to the client response.
#[tokio::test]
async fn shadow_handler_always_forwards() {
    let config = config_from(
        "proxy:\n  handler: httplogger\n  host: https://upstream.example.com\n  listen: \":0\"\nstorage:\n  type: memory\nlimits:\n  l:\n    interval: 60\n    max: 1\n    keys:\n      global: {}\n",
    );
    let rate_limiter = RateLimiter::from_config(&config).await.unwrap();
    let forwarder = MockForwarder::new(StatusCode::OK);
    let handler = Handler::new(rate_limiter, forwarder.clone(), Mode::Shadow);
    let base_url = spawn_server(handler).await;
    let client = Client::new();

    for _ in 0..3 {
        let response = client.get(format!("{base_url}/r")).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.headers().get("x-ratelimit-remaining").is_none());
    }
    // All three requests reached the mock upstream, including the ones
    // past the limit.
    assert_eq!(forwarder.call_count(), 3);
}

/// Matcher exclusion (scenario 3): a limit scoped by `matches`/`excludes`
/// only fires for requests that satisfy the match and aren't excluded.
#[tokio::test]
async fn enforcing_handler_respects_matches_and_excludes() {
    let config = config_from(
        "proxy:\n  handler: http\n  host: https://upstream.example.com\n  listen: \":0\"\nstorage:\n  type: memory\nlimits:\n  l:\n    interval: 60\n    max: 1\n    keys:\n      global: {}\n    matches:\n      headers:\n        match_any:\n          - name: Authorization\n            match: \"Bearer.*\"\n    excludes:\n      paths:\n        match_any:\n          - \"^/special/resources/.*\"\n",
    );
    let rate_limiter = RateLimiter::from_config(&config).await.unwrap();
    let forwarder = MockForwarder::new(StatusCode::OK);
    let handler = Handler::new(rate_limiter, forwarder, Mode::Enforcing { allow_on_error: false });
    let base_url = spawn_server(handler).await;
    let client = Client::new();

    // Requests without Authorization never match the limit, so even
    // repeated calls are never rate-limited (capacity 1 is never touched).
    for _ in 0..3 {
        let response = client.get(format!("{base_url}/resources/123")).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.headers().get("x-ratelimit-remaining").is_none());
    }

    // First matching request consumes the single token.
    let response = client
        .get(format!("{base_url}/resources/123"))
        .header("Authorization", "Bearer X")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Second matching request is over limit.
    let response = client
        .get(format!("{base_url}/resources/123"))
        .header("Authorization", "Bearer X")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 429);

    // Excluded path is never rate-limited even with a matching header.
    let response = client
        .get(format!("{base_url}/special/resources/9"))
        .header("Authorization", "Bearer X")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

/// A caller-supplied `X-Request-Id` is preserved rather than overwritten.
#[tokio::test]
async fn request_id_is_preserved_when_supplied() {
    let config = config_from(
        "proxy:\n  handler: http\n  host: https://upstream.example.com\n  listen: \":0\"\nstorage:\n  type: memory\nlimits:\n  l:\n    interval: 60\n    max: 5\n    keys:\n      global: {}\n",
    );
    let rate_limiter = RateLimiter::from_config(&config).await.unwrap();
    let forwarder = MockForwarder::new(StatusCode::OK);
    let handler = Handler::new(rate_limiter, forwarder, Mode::Enforcing { allow_on_error: false });
    let base_url = spawn_server(handler).await;
    let client = Client::new();

    let response = client
        .get(format!("{base_url}/r"))
        .header("x-request-id", "caller-supplied")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

/// On a non-`BucketFull` store error, `allow_on_error = true` forwards
/// instead of rejecting with `500`.
#[tokio::test]
async fn allow_on_error_forwards_on_store_transient_error() {
    struct FailingStore;

    #[async_trait]
    impl BucketStore for FailingStore {
        async fn create(
            &self,
            _name: &str,
            _capacity: u32,
            _rate: std::time::Duration,
        ) -> throttler::Result<Arc<dyn throttler::bucket_store::Bucket>> {
            Err(throttler::SphinxError::StoreTransient("connection refused".to_string()))
        }
    }

    let config: throttler::rate_limit_config::LimitConfig =
        serde_yaml::from_str("interval: 60\nmax: 5\nkeys:\n  global: {}\n").unwrap();
    let store: Arc<dyn BucketStore> = Arc::new(FailingStore);
    let limit = throttler::limit::build_limit("l".to_string(), &config, store).unwrap();
    let rate_limiter = RateLimiter::from_limits(vec![limit]);

    let forwarder = MockForwarder::new(StatusCode::OK);
    let handler = Handler::new(rate_limiter, forwarder.clone(), Mode::Enforcing { allow_on_error: true });
    let base_url = spawn_server(handler).await;
    let client = Client::new();

    let response = client.get(format!("{base_url}/r")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(forwarder.call_count(), 1);
}

/// With `allow_on_error = false`, the same transient error rejects with
/// `500` and never reaches the upstream.
#[tokio::test]
async fn disallow_on_error_rejects_with_500() {
    struct FailingStore;

    #[async_trait]
    impl BucketStore for FailingStore {
        async fn create(
            &self,
            _name: &str,
            _capacity: u32,
            _rate: std::time::Duration,
        ) -> throttler::Result<Arc<dyn throttler::bucket_store::Bucket>> {
            Err(throttler::SphinxError::StoreTransient("connection refused".to_string()))
        }
    }

    let config: throttler::rate_limit_config::LimitConfig =
        serde_yaml::from_str("interval: 60\nmax: 5\nkeys:\n  global: {}\n").unwrap();
    let store: Arc<dyn BucketStore> = Arc::new(FailingStore);
    let limit = throttler::limit::build_limit("l".to_string(), &config, store).unwrap();
    let rate_limiter = RateLimiter::from_limits(vec![limit]);

    let forwarder = MockForwarder::new(StatusCode::OK);
    let handler = Handler::new(rate_limiter, forwarder.clone(), Mode::Enforcing { allow_on_error: false });
    let base_url = spawn_server(handler).await;
    let client = Client::new();

    let response = client.get(format!("{base_url}/r")).send().await.unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(forwarder.call_count(), 0);
}

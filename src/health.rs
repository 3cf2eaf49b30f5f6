//! # Health Check
//!
//! A minimal standalone HTTP service, bound to its own port, that answers
//! `GET <endpoint>` with `200 OK` whenever the daemon is up (§6). Sphinx
//! treats the proxy's liveness as "the process is running" — there is no
//! dependency check to report, unlike the teacher's Redis-probing
//! version, since a failed bucket-store round-trip is a per-request
//! concern ([`crate::error::SphinxError::StoreTransient`]) rather than a
//! liveness signal.

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::config::HealthCheckConfig;

async fn ok() -> StatusCode {
    StatusCode::OK
}

/// Binds `health_check.port` and serves `health_check.endpoint` until the
/// task is aborted. Runs alongside the main proxy listener, not behind
/// it, so a degraded upstream never affects liveness.
pub async fn serve(config: HealthCheckConfig) {
    let app = Router::new().route(&config.endpoint, get(ok));

    let port = config.port.trim_start_matches(':');
    let addr = format!("0.0.0.0:{port}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind health-check listener");
            return;
        }
    };

    tracing::info!(%addr, endpoint = %config.endpoint, "health-check listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "health-check server stopped unexpectedly");
    }
}

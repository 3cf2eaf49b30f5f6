//! # Daemon
//!
//! Owns the current [`Handler`], binds the proxy's listener, and reloads
//! on SIGHUP (§4.7): a reload revalidates the configuration file, builds
//! a fresh `RateLimiter` + `Handler`, and atomically swaps the live
//! handler reference behind a `tokio::sync::RwLock`. A failed reload is
//! logged and the previous handler stays in place — the process never
//! drops into an unconfigured state. The listen address is fixed at
//! build time; a reload that would change it is rejected rather than
//! silently rebinding.
//!
//! Grounded on the teacher's `server.rs` for the graceful-shutdown
//! signal plumbing (`SIGINT`/`SIGTERM` via `tokio::signal`) and on
//! `original_source/daemon/daemon.go` for the reload-on-SIGHUP contract
//! and the listen-address-immutable-across-reload invariant.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::RwLock;

use crate::config::{Config, ProxyConfig};
use crate::config_validator::ConfigValidator;
use crate::error::{Result, SphinxError};
use crate::forwarder::ReqwestForwarder;
use crate::handler::{self, Handler, Mode};
use crate::health;
use crate::rate_limiter::RateLimiter;

const GRACEFUL_SHUTDOWN_WINDOW: std::time::Duration = std::time::Duration::from_secs(30);

fn mode_from_proxy(proxy: &ProxyConfig) -> Result<Mode> {
    match proxy.handler.as_str() {
        "http" => Ok(Mode::Enforcing { allow_on_error: proxy.allow_on_error }),
        "httplogger" => Ok(Mode::Shadow),
        other => Err(SphinxError::ConfigInvalid(format!("unknown proxy.handler '{other}'"))),
    }
}

async fn build_handler(config: &Config) -> Result<Handler> {
    let rate_limiter = RateLimiter::from_config(config).await?;
    let forwarder = Arc::new(ReqwestForwarder::new(&config.proxy.host)?);
    let mode = mode_from_proxy(&config.proxy)?;
    Ok(Handler::new(rate_limiter, forwarder, mode))
}

/// The running proxy: a bound listener, the live handler reference, and
/// whatever health-check service was configured alongside it.
pub struct Daemon {
    listener: TcpListener,
    listen_addr: String,
    handler: Arc<RwLock<Arc<Handler>>>,
    config_path: PathBuf,
    config: Config,
}

impl Daemon {
    /// Loads and validates the configuration at `config_path`, builds the
    /// initial handler, and binds the proxy's listener. Does not start
    /// serving — call [`Daemon::run`] for that.
    pub async fn build(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Config::load(&config_path)?;
        ConfigValidator::validate(&config)?;

        let listen_addr = config.proxy.listen.clone();
        let listener = TcpListener::bind(&listen_addr)
            .await
            .map_err(SphinxError::from)?;

        let handler = build_handler(&config).await?;

        tracing::info!(listen = %listen_addr, handler = %config.proxy.handler, "sphinx daemon built");

        Ok(Self {
            listener,
            listen_addr,
            handler: Arc::new(RwLock::new(Arc::new(handler))),
            config_path,
            config,
        })
    }

    /// Serves requests until a shutdown signal is received, honoring a
    /// ~30s graceful-shutdown window, while a separate task watches for
    /// `SIGHUP` and reloads the handler in place.
    pub async fn run(self) -> Result<()> {
        let health_task = if self.config.health_check.enabled {
            Some(tokio::spawn(health::serve(self.config.health_check.clone())))
        } else {
            None
        };

        let reload_handler = self.handler.clone();
        let reload_path = self.config_path.clone();
        let reload_listen = self.listen_addr.clone();
        tokio::spawn(async move {
            reload_on_sighup(reload_path, reload_listen, reload_handler).await;
        });

        let app = Router::new()
            .fallback(handler::serve)
            .with_state(self.handler.clone());

        let (trigger, triggered) = tokio::sync::oneshot::channel::<()>();
        let serve = axum::serve(self.listener, app).with_graceful_shutdown(async move {
            let _ = triggered.await;
        });

        tracing::info!(listen = %self.listen_addr, "sphinx listening");
        tokio::select! {
            result = serve => {
                result.map_err(SphinxError::from)?;
            }
            _ = async {
                shutdown_signal().await;
                let _ = trigger.send(());
                tokio::time::sleep(GRACEFUL_SHUTDOWN_WINDOW).await;
            } => {
                tracing::warn!(
                    "graceful shutdown window ({}s) elapsed with requests still in flight, forcing exit",
                    GRACEFUL_SHUTDOWN_WINDOW.as_secs()
                );
            }
        }

        if let Some(task) = health_task {
            task.abort();
        }

        Ok(())
    }
}

#[cfg(unix)]
async fn reload_on_sighup(config_path: PathBuf, listen_addr: String, handler: Arc<RwLock<Arc<Handler>>>) {
    let mut stream = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGHUP handler, reload disabled");
            return;
        }
    };
    loop {
        stream.recv().await;
        tracing::info!("SIGHUP received, reloading configuration");
        match reload_once(&config_path, &listen_addr).await {
            Ok(new_handler) => {
                *handler.write().await = Arc::new(new_handler);
                tracing::info!("configuration reloaded");
            }
            Err(e) => {
                tracing::error!(error = %e, "reload rejected, keeping previous configuration");
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_sighup(_config_path: PathBuf, _listen_addr: String, _handler: Arc<RwLock<Arc<Handler>>>) {
    std::future::pending::<()>().await;
}

async fn reload_once(config_path: &Path, listen_addr: &str) -> Result<Handler> {
    let config = Config::load(config_path)?;
    ConfigValidator::validate(&config)?;
    if config.proxy.listen != listen_addr {
        return Err(SphinxError::ConfigInvalid(format!(
            "proxy.listen changed from '{listen_addr}' to '{}': listen address is immutable across reload",
            config.proxy.listen
        )));
    }
    build_handler(&config).await
}

/// Waits for `SIGINT`/`SIGTERM`, matching the teacher's shutdown-signal
/// plumbing. The caller starts graceful shutdown once this resolves and
/// bounds how long it waits for in-flight requests to [`GRACEFUL_SHUTDOWN_WINDOW`].
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, starting graceful shutdown ({}s window)", GRACEFUL_SHUTDOWN_WINDOW.as_secs());
        },
        _ = terminate => {
            tracing::info!("received terminate signal, starting graceful shutdown ({}s window)", GRACEFUL_SHUTDOWN_WINDOW.as_secs());
        },
    }
}

//! HTTP boundary for Traefik's `forwardAuth`
//!
//! Routes:
//!
//! - `ANY /` verification, answering 200 with `X-Consumer-Id`, 401 or 500
//! - `GET /health`
//! - `GET /metrics` (Prometheus text, when an exporter is installed)
//! - `ANY /200` and `ANY /404`, only in debug mode

pub mod handlers;
pub mod middleware;

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::{any, get};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::metrics::MetricsRender;
use crate::services::AuthService;

/// State shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub metrics: MetricsRender,
    pub debug: bool,
}

impl AppState {
    pub fn new(auth: AuthService) -> Self {
        Self {
            auth,
            metrics: MetricsRender::default(),
            debug: false,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRender) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Build the router for `state`
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", any(handlers::verify))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics));

    if state.debug {
        router = router
            .route("/200", any(handlers::always_success))
            .route("/404", any(handlers::always_fail));
    }

    router
        .layer(axum::middleware::from_fn(middleware::log_request))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves
///
/// In-flight requests get `drain` to finish once shutdown starts; whatever
/// is still open after that is dropped.
///
/// # Errors
///
/// Returns error if the listener fails
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
    drain: Duration,
) -> Result<()> {
    let draining = Arc::new(Notify::new());
    let notify = Arc::clone(&draining);

    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        tracing::info!("Shutting down, draining connections for {:?}", drain);
        notify.notify_one();
    })
    .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        _ = async {
            draining.notified().await;
            tokio::time::sleep(drain).await;
        } => {
            tracing::warn!("Drain timeout elapsed, closing remaining connections");
        }
    }

    Ok(())
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

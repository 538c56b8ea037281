pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::http::{HeaderValue, Method, header};
use axum::{Extension, Router, routing::get};
use once_cell::sync::Lazy;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::catalog::DynChannelCatalog;
use crate::config::AppConfig;
use api::{StreamController, health_controller::health_endpoint};
use services::ProxyServices;

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_uptime_seconds() -> u64 {
    STARTED_AT.elapsed().as_secs()
}

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// every route, every layer, no listener, tests drive this with `oneshot`
pub fn build_router(services: ProxyServices) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(86400));

    let max_concurrent_requests = services.config.max_concurrent_requests.max(1);

    // the cors layer answers every OPTIONS itself, /streams has its own 204 preflight
    Router::new()
        .route("/health", get(health_endpoint).layer(cors))
        .nest("/streams", StreamController::app())
        .layer(Extension(services))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        // one semaphore for the whole router, not one per route
        .layer(GlobalConcurrencyLimitLayer::new(max_concurrent_requests))
        .layer(TraceLayer::new_for_http())
}

pub struct StreamProxyServer;

impl StreamProxyServer {
    pub async fn serve(config: Arc<AppConfig>, catalog: DynChannelCatalog) -> anyhow::Result<()> {
        Lazy::force(&STARTED_AT);

        let services = ProxyServices::new(config.clone(), catalog)?;

        // warm the allowlist so a broken catalog shows up at boot, not on the first request
        services
            .allowlist
            .snapshot()
            .await
            .context("failed to load the channel catalog")?;

        let router = build_router(services);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        info!("routes initialized, listening on port {}", config.port);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("error while starting server")?;

        info!("server shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install ctrl+c handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("failed to install sigterm handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining connections...");
}

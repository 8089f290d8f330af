//! HTTP server wiring.

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers::{contact, health, subscribe, unsubscribe};
use crate::config::{FormguardConfig, LimitConfig};
use crate::contact::MessageSink;
use crate::error::Result;
use crate::ratelimit::{
    Clock, IdentityHasher, RateLimitCounter, RateLimiter, SqliteCounterStore,
};
use crate::subscribers::SubscriberStore;

/// Shared application state.
pub struct AppState {
    pub contact_limiter: RateLimiter,
    pub newsletter_limiter: RateLimiter,
    pub subscribers: SubscriberStore,
    pub sink: Arc<dyn MessageSink>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Build limiters and stores over `pool` from configuration.
    pub async fn build(
        config: &FormguardConfig,
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self> {
        let rate_limiting = &config.rate_limiting;
        let hasher = IdentityHasher::new(config.identity.salt.clone());

        let limiter = |name: &'static str, store: SqliteCounterStore, limit: &LimitConfig| {
            let counter = RateLimitCounter::new(Arc::new(store), hasher.clone())
                .with_clock(clock.clone())
                .with_retention(rate_limiting.retention());
            RateLimiter::from_config(name, Arc::new(counter), limit).map(|limiter| {
                limiter
                    .with_policy(rate_limiting.on_store_error)
                    .with_local_cache(rate_limiting.local_cache)
            })
        };

        let contact_store =
            SqliteCounterStore::new(pool.clone(), &rate_limiting.contact.table).await?;
        let newsletter_store =
            SqliteCounterStore::new(pool.clone(), &rate_limiting.newsletter.table).await?;

        Ok(Self {
            contact_limiter: limiter("contact", contact_store, &rate_limiting.contact)?,
            newsletter_limiter: limiter("newsletter", newsletter_store, &rate_limiting.newsletter)?,
            subscribers: SubscriberStore::new(pool).await?,
            sink,
            clock,
        })
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/contact", post(contact))
        .route("/newsletter/subscribe", post(subscribe))
        .route("/newsletter/unsubscribe/{token}", post(unsubscribe))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP server for the form endpoints.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared state handed to every handler
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, state: Arc<AppState>) -> Self {
        Self { addr, state }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            router(self.state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

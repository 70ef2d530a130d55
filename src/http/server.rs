//! HTTP server setup and routing.
//!
//! # Responsibilities
//! - Create the Axum router mounted under the configured prefix
//! - Wire up middleware (CORS/pre-flight, rate limit, timeout, tracing)
//! - Dispatch sub-paths to the protocol version handlers
//! - Funnel handler errors into the JSON error shape
//!
//! # Design Decisions
//! - The routing table is a match over the stripped sub-path, keyed once at
//!   dispatch; unknown paths yield a JSON 404
//! - Upgrade intent switches a versioned path between its HTTP and
//!   WebSocket handlers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode};
use axum::middleware;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::BareConfig;
use crate::error::BareError;
use crate::fetch::OutboundClient;
use crate::http::request::{is_websocket_upgrade, strip_prefix};
use crate::http::response::{cors_middleware, json_response};
use crate::info::manifest;
use crate::lifecycle::Shutdown;
use crate::meta::{MemoryMetaStore, MetaStorage, MetaStore};
use crate::proto::{v1, v2, v3};
use crate::security::rate_limit::{rate_limit_middleware, RateLimiter, RateLimiterLayerState};
use crate::security::SsrfPolicy;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BareConfig>,
    pub outbound: Arc<OutboundClient>,
    pub meta: MetaStorage,
    pub shutdown: broadcast::Sender<()>,
}

/// The tunnel server.
pub struct BareServer {
    state: AppState,
    shutdown: Shutdown,
}

impl BareServer {
    /// Create a server backed by the in-memory meta store.
    pub fn new(config: BareConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryMetaStore::default()))
    }

    /// Create a server over a caller-supplied meta store.
    pub fn with_store(config: BareConfig, store: Arc<dyn MetaStore>) -> Self {
        let shutdown = Shutdown::new();
        let policy = Arc::new(SsrfPolicy::from_config(&config.ssrf));
        let state = AppState {
            config: Arc::new(config),
            outbound: Arc::new(OutboundClient::new(policy)),
            meta: MetaStorage::new(store),
            shutdown: shutdown.sender(),
        };
        Self { state, shutdown }
    }

    /// Shutdown coordinator for signal wiring and tests.
    pub fn shutdown_handle(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(&self) -> Router {
        let config = &self.state.config;
        let prefix = config.server.mount_prefix.clone();
        let catch_all = format!("{prefix}{{*path}}");

        let mut router = Router::new()
            .route(&prefix, any(index_handler))
            .route(&catch_all, any(dispatch_handler))
            .with_state(self.state.clone());

        if config.rate_limit.enabled {
            let limiter = Arc::new(RateLimiterLayerState {
                limiter: RateLimiter::new(&config.rate_limit),
                log_errors: config.server.log_errors,
            });
            router = router.layer(middleware::from_fn_with_state(
                limiter,
                rate_limit_middleware,
            ));
        }

        // Later layers wrap earlier ones; CORS must be outermost so
        // pre-flights never reach the limiter and errors still gain the set.
        router
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.server.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(cors_middleware))
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            prefix = %self.state.config.server.mount_prefix,
            "Tunnel server starting"
        );

        self.state.meta.spawn_reaper(self.shutdown.subscribe());

        let app = self
            .build_router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let mut shutdown_rx = self.shutdown.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        tracing::info!("Tunnel server stopped");
        Ok(())
    }
}

/// `GET <prefix>` — instance manifest.
async fn index_handler(State(state): State<AppState>) -> Response<Body> {
    json_response(StatusCode::OK, &manifest(&state.config))
}

/// Catch-all under the mount prefix: strip, dispatch, funnel errors.
async fn dispatch_handler(State(state): State<AppState>, req: Request<Body>) -> Response<Body> {
    let log_errors = state.config.server.log_errors;
    match route_request(&state, req).await {
        Ok(response) => response,
        Err(error) => {
            if log_errors {
                tracing::error!(error = %error, code = error.code(), "Request failed");
            }
            error.into_response(log_errors)
        }
    }
}

async fn route_request(
    state: &AppState,
    req: Request<Body>,
) -> Result<Response<Body>, BareError> {
    let path = req.uri().path().to_string();
    let sub = strip_prefix(&path, &state.config.server.mount_prefix)
        .ok_or(BareError::NotFound)?
        .to_string();

    match (sub.as_str(), is_websocket_upgrade(&req)) {
        ("v1/", false) => v1::handle_request(state, req).await,
        ("v1/", true) => v1::handle_upgrade(state, req).await,
        ("v1/ws-new-meta", _) => v1::handle_new_meta(state).await,
        ("v1/ws-meta", _) => v1::handle_get_meta(state, req).await,
        ("v2/", false) => v2::handle_request(state, req).await,
        ("v2/", true) => v2::handle_upgrade(state, req).await,
        ("v2/ws-new-meta", _) => v2::handle_new_meta(state, req.headers(), req.uri()).await,
        ("v2/ws-meta", _) => v2::handle_get_meta(state, req).await,
        ("v3/", false) => v3::handle_request(state, req).await,
        ("v3/", true) => v3::handle_upgrade(state, req).await,
        _ => Err(BareError::NotFound),
    }
}

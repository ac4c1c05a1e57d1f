//! HTTP Server configuration and startup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use offramp_types::OrderRepository;

use super::auth::admin_auth_middleware;
use super::handlers::{self, AppState};
use super::rate_limit::{
    DEFAULT_REQUESTS_PER_MINUTE, PRUNE_INTERVAL, RateLimiterState, rate_limit_middleware,
};
use crate::OfframpService;
use crate::openapi::ApiDoc;

/// Knobs of the HTTP adapter.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub admin_token: Option<String>,
    pub requests_per_minute: u32,
    /// Allowed CORS origins; `*` allows any, empty disables CORS headers
    pub cors_origins: Vec<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            admin_token: None,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            cors_origins: Vec::new(),
        }
    }
}

/// HTTP Server for the off-ramp API.
pub struct HttpServer<R: OrderRepository> {
    state: Arc<AppState<R>>,
    rate_limiter: Arc<RateLimiterState>,
    cors_origins: Vec<String>,
}

impl<R: OrderRepository> HttpServer<R> {
    pub fn new(service: Arc<OfframpService<R>>, options: ServerOptions) -> Self {
        let admin_token = options.admin_token.filter(|t| !t.trim().is_empty());
        Self {
            rate_limiter: Arc::new(RateLimiterState::per_minute(
                options.requests_per_minute,
                admin_token.clone(),
            )),
            state: Arc::new(AppState {
                service,
                admin_token,
            }),
            cors_origins: options.cors_origins,
        }
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        // Build HTTP metrics layer (uses globally set MeterProvider)
        let metrics = axum_otel_metrics::HttpMetricsLayerBuilder::new().build();

        let admin = Router::new()
            .route("/otc/set-price", post(handlers::set_price::<R>))
            .route(
                "/offramp/trigger-payout/{id}",
                post(handlers::trigger_payout::<R>),
            )
            .route("/offramp/orders", get(handlers::list_orders::<R>))
            .route(
                "/changenow/sell-transaction",
                post(handlers::changenow_create_sell::<R>),
            )
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                admin_auth_middleware::<R>,
            ));

        Router::new()
            .route("/health", get(handlers::health))
            .route("/otc/listings", get(handlers::list_listings::<R>))
            .route("/offramp/create-order", post(handlers::create_order::<R>))
            .route("/offramp/orders/{id}", get(handlers::get_order::<R>))
            .route(
                "/webhooks/nowpayments",
                post(handlers::nowpayments_webhook::<R>),
            )
            .route("/webhooks/stripe", post(handlers::stripe_webhook::<R>))
            .route(
                "/changenow/widget-sell-eur",
                get(handlers::changenow_widget::<R>),
            )
            .route(
                "/changenow/min-amount",
                get(handlers::changenow_min_amount::<R>),
            )
            .route("/changenow/estimate", get(handlers::changenow_estimate::<R>))
            .merge(admin)
            .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
            .layer(metrics)
            .layer(middleware::from_fn_with_state(
                self.rate_limiter.clone(),
                rate_limit_middleware,
            ))
            .layer(cors_layer(&self.cors_origins))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serves until `shutdown` is cancelled, then drains in-flight requests.
    ///
    /// Peer addresses are attached to every request for rate limiting.
    pub async fn run(self, addr: &str, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        tokio::spawn(
            self.rate_limiter
                .clone()
                .prune_until(PRUNE_INTERVAL, shutdown.clone()),
        );

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

        Ok(())
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}

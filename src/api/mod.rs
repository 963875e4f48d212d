//! HTTP surface: router assembly, shared middleware, and server startup.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header::AUTHORIZATION, HeaderName, HeaderValue, Method, Request},
    routing::get,
    Extension, Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    rate_limit::{CounterStore, MemoryCounterStore, RateLimiter},
    session::{MemorySessionStore, SessionStore},
};

pub mod handlers;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::breach::range, handlers::health::health, handlers::session::me),
    components(
        schemas(
            handlers::health::Health,
            handlers::health::HealthChecks,
            handlers::session::MeResponse
        )
    ),
    tags(
        (name = "breach", description = "k-anonymity breached password range proxy"),
        (name = "auth", description = "Session state for the application shell"),
        (name = "health", description = "Dependency health aggregation"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    breach_config: handlers::breach::BreachConfig,
    cache_required: bool,
    mailer_configured: bool,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    // One counter store backs both the breach limiter and the cache health
    // probe; swapping in a shared backend changes this single binding.
    let counter_store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
    let limiter = RateLimiter::new(counter_store.clone());

    let breach_state = Arc::new(handlers::breach::BreachState::new(breach_config, limiter)?);
    let health_state = Arc::new(
        handlers::health::HealthState::new(counter_store)
            .with_cache_required(cache_required)
            .with_mailer_configured(mailer_configured),
    );
    let session_store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());

    let app = router(pool, breach_state, health_state, session_store);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Assemble the router. Routes registered after a `.layer` call sit outside
/// that middleware, so every route goes in before the shared stack.
fn router(
    pool: PgPool,
    breach_state: Arc<handlers::breach::BreachState>,
    health_state: Arc<handlers::health::HealthState>,
    session_store: Arc<dyn SessionStore>,
) -> Router {
    let cors = CorsLayer::new()
        // the shell probes /auth/me with a bearer token
        .allow_headers([AUTHORIZATION])
        .allow_methods([Method::GET])
        // allow requests from any origin
        .allow_origin(Any);

    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/breach", get(handlers::breach::range))
        .route("/auth/me", get(handlers::session::me))
        .route("/", get(handlers::root::root))
        .route(
            "/health",
            get(handlers::health::health).options(handlers::health::health),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(breach_state))
                .layer(Extension(session_store)),
        )
        .layer(Extension(health_state))
        .layer(Extension(pool))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

//! Health aggregator for load balancers and uptime probes.

use super::DependencyStatus;
use crate::rate_limit::CounterStore;
use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

/// Probes and policy shared with the router.
pub struct HealthState {
    store: Arc<dyn CounterStore>,
    cache_required: bool,
    mailer_configured: bool,
}

impl HealthState {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            cache_required: false,
            mailer_configured: false,
        }
    }

    /// When set, a failing counter store degrades overall health instead of
    /// only being reported in `checks`.
    #[must_use]
    pub fn with_cache_required(mut self, required: bool) -> Self {
        self.cache_required = required;
        self
    }

    #[must_use]
    pub fn with_mailer_configured(mut self, configured: bool) -> Self {
        self.mailer_configured = configured;
        self
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct HealthChecks {
    database: String,
    redis: String,
    email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    status: String,
    timestamp: String,
    checks: HealthChecks,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "All required dependencies are healthy", body = [Health]),
        (status = 503, description = "Database, or a required cache, is unhealthy", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(
    method: Method,
    pool: Extension<PgPool>,
    state: Extension<Arc<HealthState>>,
) -> impl IntoResponse {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let database = match pool.0.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => DependencyStatus::Ok,
                Err(error) => {
                    error!("Failed to ping database: {}", error);
                    DependencyStatus::Error
                }
            }
        }
        Err(error) => {
            error!("Failed to acquire database connection: {}", error);
            DependencyStatus::Error
        }
    };

    let redis = match state.0.store.ping() {
        Ok(()) => DependencyStatus::Ok,
        Err(error) => {
            error!("Counter store ping failed: {}", error);
            DependencyStatus::Error
        }
    };

    let email = if state.0.mailer_configured {
        DependencyStatus::Ok
    } else {
        DependencyStatus::Unconfigured
    };

    let is_healthy = overall_healthy(database, redis, state.0.cache_required);

    let health = Health {
        status: if is_healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        checks: HealthChecks {
            database: database.as_str().to_string(),
            redis: redis.as_str().to_string(),
            email: email.as_str().to_string(),
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    // Create headers using the map method
    let headers = x_app_value()
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    // Unwrap the headers or provide a default value (empty headers) in case of an error
    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    if is_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

/// Overall health: the database is load-bearing; the cache only when the
/// deployment declares it required. Email never gates readiness.
const fn overall_healthy(
    database: DependencyStatus,
    redis: DependencyStatus,
    cache_required: bool,
) -> bool {
    database.is_healthy() && (!cache_required || redis.is_healthy())
}

/// `name:version:short-hash` identifier carried in the `X-App` header.
fn x_app_value() -> String {
    let commit = GIT_COMMIT_HASH;
    let short_hash = if commit.len() > 7 { &commit[0..7] } else { "" };

    format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )
}

//! Session whoami endpoint consumed by the application shell's guard.

use axum::{
    extract::Extension,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;

use crate::session::{hash_session_token, SessionStore};

const SESSION_COOKIE_NAME: &str = "gardi_session";

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub user_id: String,
    pub email: String,
    pub created_at: String,
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Session is active", body = MeResponse),
        (status = 401, description = "Missing or invalid session credentials")
    ),
    tag = "auth"
)]
pub async fn me(
    Extension(store): Extension<Arc<dyn SessionStore>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    // Anonymous and invalid look identical from the outside; the guard only
    // cares about success versus non-success.
    let Some(token) = extract_session_token(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    // Only the hash is stored; never compare raw tokens against the store.
    let token_hash = hash_session_token(&token);
    match store.lookup(&token_hash) {
        Some(record) => {
            let response = MeResponse {
                user_id: record.user_id.to_string(),
                email: record.email,
                created_at: rfc3339_from_unix(record.created_at_unix),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        None => {
            debug!("No active session for presented token");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

fn rfc3339_from_unix(seconds: i64) -> String {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map_or_else(String::new, |timestamp| timestamp.to_rfc3339())
}

/// Bearer header wins over the cookie, so API clients and the browser shell
/// can coexist on one endpoint.
fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{generate_session_token, MemorySessionStore, SessionRecord};
    use axum::http::HeaderValue;
    use uuid::Uuid;

    fn store_with_session(token: &str) -> (Arc<dyn SessionStore>, Uuid) {
        let store = MemorySessionStore::new();
        let user_id = Uuid::new_v4();
        store.insert(
            hash_session_token(token),
            SessionRecord {
                user_id,
                email: "user@example.com".to_string(),
                created_at_unix: 1_700_000_000,
            },
        );
        (Arc::new(store), user_id)
    }

    fn bearer_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn extracts_bearer_before_cookie() {
        let mut headers = bearer_headers("from-bearer");
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("gardi_session=from-cookie"),
        );

        assert_eq!(
            extract_session_token(&headers),
            Some("from-bearer".to_string())
        );
    }

    #[test]
    fn extracts_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; gardi_session=abc123; lang=en"),
        );

        assert_eq!(extract_session_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn empty_bearer_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));

        assert_eq!(extract_session_token(&headers), None);
        assert_eq!(extract_session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn timestamps_render_rfc3339() {
        assert_eq!(rfc3339_from_unix(0), "1970-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn active_session_answers_200_with_identity() {
        let token = generate_session_token().unwrap();
        let (store, user_id) = store_with_session(&token);

        let response = me(Extension(store), bearer_headers(&token))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["user_id"], user_id.to_string());
        assert_eq!(json["email"], "user@example.com");
    }

    #[tokio::test]
    async fn unknown_token_answers_401() {
        let (store, _) = store_with_session("known");

        let response = me(Extension(store), bearer_headers("unknown"))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_credentials_answer_401() {
        let (store, _) = store_with_session("known");

        let response = me(Extension(store), HeaderMap::new()).await.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

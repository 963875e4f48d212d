//! Session records and the storage seam behind the whoami endpoint.
//!
//! Raw session tokens live only in the client's cookie or bearer header;
//! the store keys on a `SHA-256` hash so raw values never touch storage.

use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};
use uuid::Uuid;

/// Resolved session as the storage layer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: Uuid,
    pub email: String,
    pub created_at_unix: i64,
}

/// Session lookup seam for the whoami endpoint and login/logout flows.
///
/// Implementations must only ever see hashed tokens; hashing happens at the
/// HTTP boundary before any lookup.
pub trait SessionStore: Send + Sync {
    /// Resolve a hashed token into its session record, if one is active.
    fn lookup(&self, token_hash: &[u8]) -> Option<SessionRecord>;

    /// Register a session under a hashed token.
    fn insert(&self, token_hash: Vec<u8>, record: SessionRecord);

    /// Drop a session, typically on logout.
    fn remove(&self, token_hash: &[u8]);
}

/// Mutex-guarded map store for development and tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Vec<u8>, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn lookup(&self, token_hash: &[u8]) -> Option<SessionRecord> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(token_hash).cloned())
    }

    fn insert(&self, token_hash: Vec<u8>, record: SessionRecord) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(token_hash, record);
        }
    }

    fn remove(&self, token_hash: &[u8]) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(token_hash);
        }
    }
}

/// Create a new session token for the auth cookie or bearer header.
/// The raw value is only handed to the client; stores see its hash.
///
/// # Errors
/// Returns an error if the system randomness source fails.
pub fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(hex::encode(bytes))
}

/// Hash a session token so raw values never touch storage.
/// The hash is the lookup key when the cookie or header is presented.
#[must_use]
pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Seconds since the Unix epoch, for stamping `created_at_unix`.
#[must_use]
pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

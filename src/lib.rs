//! # Gardi (Password Vault & Breach Screening)
//!
//! `gardi` is the server side of a password manager plus the client-side
//! session guard its application shell embeds. Vault entries are encrypted on
//! the client; the server never holds key material, only ciphertext and
//! session state.
//!
//! ## Breach Screening (k-anonymity)
//!
//! Candidate passwords are screened against known breach corpora without ever
//! leaving the client: the client hashes the password with `SHA-1` and
//! discloses only the first five hex characters of the digest. The `/breach`
//! endpoint proxies that prefix to an upstream range API and relays the
//! `SUFFIX:COUNT` response verbatim so matching happens client side.
//!
//! - **Fail open:** screening is advisory. Upstream outages, rate-limit store
//!   failures, and unreadable responses all degrade to "no data" (an empty
//!   `200`) so signup and password changes are never blocked by the checker.
//! - **Rate limited:** lookups are bucketed per client identity in a fixed
//!   window; over-budget requests get `429` with a `Retry-After` hint.
//!
//! ## Session Model (Two Factors to Render)
//!
//! A protected route renders only when **both** hold: the server session is
//! valid (probed via `GET /auth/me`, never cached across renders) and the
//! vault is unlocked (decryption key derived locally). The [`guard`] module is
//! the fail-closed twin of the breach proxy: any ambiguity redirects to
//! `/login` or `/unlock` instead of rendering.

pub mod api;
pub mod breach;
pub mod cli;
pub mod guard;
pub mod rate_limit;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}

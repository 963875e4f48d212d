//! k-anonymity breached password screening.
//!
//! A candidate password is hashed with `SHA-1` locally and only the first
//! five hex characters of the digest are ever disclosed. The range response
//! (`SUFFIX:COUNT` lines) is matched against the withheld suffix on this side
//! of the wire, so neither the password nor its full digest leaves the
//! process. Credential screening against known corpora is a NIST 800-63B
//! requirement; here it is advisory and always fails open.

use regex::Regex;
use reqwest::StatusCode;
use sha1::{Digest, Sha1};
use std::time::Duration;
use url::Url;

/// Length of the digest prefix disclosed to the lookup service.
pub const PREFIX_LEN: usize = 5;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Uppercase hex `SHA-1` digest of a UTF-8 password.
#[must_use]
pub fn password_digest(password: &str) -> String {
    hex::encode_upper(Sha1::digest(password.as_bytes()))
}

/// Hash the password and split the digest for the range protocol: the
/// five-character prefix may be disclosed, the 35-character suffix never is.
#[must_use]
pub fn prefix_and_suffix(password: &str) -> (String, String) {
    let digest = password_digest(password);
    let (prefix, suffix) = digest.split_at(PREFIX_LEN);
    (prefix.to_string(), suffix.to_string())
}

/// Whether `prefix` is exactly five uppercase hex characters.
#[must_use]
pub fn valid_prefix(prefix: &str) -> bool {
    Regex::new(r"^[0-9A-F]{5}$").is_ok_and(|re| re.is_match(prefix))
}

/// Normalize a raw prefix query value: trim, uppercase, then validate.
/// Anything that does not end up as five hex characters is rejected.
#[must_use]
pub fn normalize_prefix(raw: &str) -> Option<String> {
    let candidate = raw.trim().to_uppercase();
    valid_prefix(&candidate).then_some(candidate)
}

/// Breach count for `suffix` within a raw range response body.
///
/// Lines are `SUFFIX:COUNT`; unparseable lines are skipped rather than
/// matched. `0` means the suffix is absent, which includes the empty body
/// the proxy answers with when it has no data.
#[must_use]
pub fn suffix_count(body: &str, suffix: &str) -> u64 {
    body.lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(suffix))
        .and_then(|(_, count)| count.trim().parse().ok())
        .unwrap_or(0)
}

/// Errors surfaced by [`BreachClient`]. Signup and password-change flows are
/// expected to fail open on every one of them; screening is advisory.
#[derive(Debug, thiserror::Error)]
pub enum BreachLookupError {
    /// Transport-level failure talking to the lookup endpoint.
    #[error("Breach lookup request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The endpoint rejected the lookup (rate limited or malformed prefix).
    #[error("Breach lookup rejected with status {0}")]
    Rejected(StatusCode),
}

/// Client half of the range protocol, pointed at a `/breach` endpoint.
#[derive(Debug)]
pub struct BreachClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl BreachClient {
    /// Build a client for the given `/breach` endpoint URL.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(endpoint: Url) -> Result<Self, BreachLookupError> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(LOOKUP_TIMEOUT)
            .build()?;

        Ok(Self { client, endpoint })
    }

    /// Number of known breaches the password appears in; `0` reads as clean.
    ///
    /// Only the digest prefix is sent. An empty body (the proxy's answer
    /// when it has no data) reads as clean, which is the fail-open contract.
    ///
    /// # Errors
    /// Returns [`BreachLookupError`] when the endpoint is unreachable or
    /// rejects the lookup.
    pub async fn breach_count(&self, password: &str) -> Result<u64, BreachLookupError> {
        let (prefix, suffix) = prefix_and_suffix(password);

        let mut url = self.endpoint.clone();
        url.query_pairs_mut().clear().append_pair("prefix", &prefix);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BreachLookupError::Rejected(status));
        }

        let body = response.text().await?;
        Ok(suffix_count(&body, &suffix))
    }

    /// Convenience wrapper over [`Self::breach_count`].
    ///
    /// # Errors
    /// Same as [`Self::breach_count`].
    pub async fn is_breached(&self, password: &str) -> Result<bool, BreachLookupError> {
        Ok(self.breach_count(password).await? > 0)
    }
}

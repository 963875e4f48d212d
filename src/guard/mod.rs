//! Session guard for the application shell.
//!
//! Flow Overview:
//! 1) Every protected route evaluation starts in `Checking`; nothing renders.
//! 2) Public routes (allow-list prefix match) are allowed with zero network
//!    calls, so `/login` and `/signup` render even when the API is down.
//! 3) Everything else probes the server session (never cached across
//!    evaluations) and then the local vault-unlock flag. Failing either one
//!    redirects to `/login` or `/unlock`.
//!
//! The guard fails closed: probe transport errors read as "not
//! authenticated". It is UX-level protection only; vault payloads are
//! ciphertext the shell cannot decrypt without the unlock key, and real
//! access control lives on the API.
//!
//! A generation counter makes supersession explicit. Starting a new
//! evaluation, or flipping the unlock flag, invalidates every in-flight
//! check; a stale probe result is discarded without touching state or
//! navigating, so a slow response can never redirect a user who has since
//! moved on.

use secrecy::{ExposeSecret, SecretString};
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};
use tracing::{debug, warn};
use url::Url;

const DEFAULT_LOGIN_ROUTE: &str = "/login";
const DEFAULT_UNLOCK_ROUTE: &str = "/unlock";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Observable guard status, as last committed by an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Evaluation in progress; the shell must not render children yet.
    Checking,
    /// Terminal for the current evaluation: navigation was decided.
    Redirecting,
    /// Terminal for the current evaluation: children may render.
    Allowed,
}

/// What the shell should do once an evaluation commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Render the protected children.
    Render,
    /// Navigate to the given route instead of rendering.
    Redirect(String),
}

/// Probe failures. The guard maps every variant to "not authenticated".
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Transport-level failure reaching the endpoint.
    #[error("Authentication probe request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The configured API base could not be turned into a probe URL.
    #[error("Invalid authentication endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// Authentication-status seam: one round-trip answering "is this session
/// valid right now?". Implementations must not cache across calls; the
/// guard relies on every evaluation observing the server's current answer.
pub trait AuthProbe: Send + Sync {
    fn check_session(&self)
        -> Pin<Box<dyn Future<Output = Result<bool, ProbeError>> + Send + '_>>;
}

/// Route classification: which paths are reachable without a session and
/// where failed checks redirect.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    public_prefixes: Vec<String>,
    login_route: String,
    unlock_route: String,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            public_prefixes: vec![
                "/login".to_string(),
                "/signup".to_string(),
                "/verify-email".to_string(),
            ],
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            unlock_route: DEFAULT_UNLOCK_ROUTE.to_string(),
        }
    }
}

impl RoutePolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the allow-list of public route prefixes.
    #[must_use]
    pub fn with_public_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.public_prefixes = prefixes;
        self
    }

    #[must_use]
    pub fn with_login_route(mut self, route: String) -> Self {
        self.login_route = route;
        self
    }

    #[must_use]
    pub fn with_unlock_route(mut self, route: String) -> Self {
        self.unlock_route = route;
        self
    }

    /// Public routes match by prefix, so `/login` also covers `/login/sso`.
    #[must_use]
    pub fn is_public(&self, path: &str) -> bool {
        self.public_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    #[must_use]
    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    #[must_use]
    pub fn unlock_route(&self) -> &str {
        &self.unlock_route
    }
}

/// Generation counter and committed state, always updated together.
struct GuardInner {
    generation: u64,
    state: GuardState,
}

/// Render-or-redirect state machine for protected routes.
///
/// One instance lives in the shell; `evaluate` runs on mount and again on
/// every path or unlock change. Results commit only if no newer evaluation
/// has started in the meantime.
pub struct SessionGuard {
    probe: Arc<dyn AuthProbe>,
    policy: RoutePolicy,
    unlocked: AtomicBool,
    inner: Mutex<GuardInner>,
}

impl SessionGuard {
    #[must_use]
    pub fn new(probe: Arc<dyn AuthProbe>, policy: RoutePolicy) -> Self {
        Self {
            probe,
            policy,
            unlocked: AtomicBool::new(false),
            inner: Mutex::new(GuardInner {
                generation: 0,
                state: GuardState::Checking,
            }),
        }
    }

    /// Guard status as last committed by an evaluation.
    #[must_use]
    pub fn state(&self) -> GuardState {
        self.inner.lock().map_or(GuardState::Checking, |inner| inner.state)
    }

    /// Vault-unlock flag, owned by the vault-crypto layer.
    ///
    /// Flipping it supersedes in-flight checks, so a stale probe result
    /// cannot redirect a user who just unlocked through another tab.
    pub fn set_unlocked(&self, unlocked: bool) {
        self.unlocked.store(unlocked, Ordering::SeqCst);
        if let Ok(mut inner) = self.inner.lock() {
            inner.generation += 1;
        }
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    /// Decide render-or-redirect for `path`.
    ///
    /// Returns `None` when the evaluation was superseded before it could
    /// commit; the caller must discard it without navigating. `Some` means
    /// the matching state transition has already been applied.
    pub async fn evaluate(&self, path: &str) -> Option<GuardDecision> {
        let generation = self.begin()?;

        // Allow-listed routes render with zero network calls.
        if self.policy.is_public(path) {
            self.commit(generation, GuardState::Allowed)?;
            return Some(GuardDecision::Render);
        }

        let authenticated = match self.probe.check_session().await {
            Ok(authenticated) => authenticated,
            Err(err) => {
                // Fail closed: an unreachable API reads as "not
                // authenticated", never as permission to render.
                warn!("Authentication probe failed: {err}");
                false
            }
        };

        if !authenticated {
            self.commit(generation, GuardState::Redirecting)?;
            return Some(GuardDecision::Redirect(self.policy.login_route().to_string()));
        }

        // The unlock route itself must stay reachable while locked.
        if !self.is_unlocked() && path != self.policy.unlock_route() {
            self.commit(generation, GuardState::Redirecting)?;
            return Some(GuardDecision::Redirect(self.policy.unlock_route().to_string()));
        }

        self.commit(generation, GuardState::Allowed)?;
        Some(GuardDecision::Render)
    }

    /// Open a new evaluation: claim the next generation and reset the
    /// observable state to `Checking` in the same critical section.
    fn begin(&self) -> Option<u64> {
        let mut inner = self.inner.lock().ok()?;
        inner.generation += 1;
        inner.state = GuardState::Checking;
        Some(inner.generation)
    }

    /// Apply a state transition only while `generation` is still current.
    ///
    /// The generation check and the state write happen under one lock, so a
    /// superseded evaluation can never write over a newer one's state no
    /// matter how threads interleave.
    fn commit(&self, generation: u64, state: GuardState) -> Option<()> {
        let mut inner = self.inner.lock().ok()?;
        if inner.generation != generation {
            debug!("Discarding superseded guard evaluation");
            return None;
        }
        inner.state = state;
        Some(())
    }
}

/// [`AuthProbe`] over HTTP: `GET {api_base}/auth/me` with the shell's
/// bearer token attached. Any non-success status reads as "not
/// authenticated"; only transport failures surface as errors.
pub struct HttpAuthProbe {
    client: reqwest::Client,
    endpoint: Url,
    token: RwLock<Option<SecretString>>,
}

impl HttpAuthProbe {
    /// Build a probe against an API base URL such as `https://api.gardi.dev`.
    ///
    /// # Errors
    /// Returns an error if the endpoint URL or HTTP client cannot be built.
    pub fn new(api_base: &str) -> Result<Self, ProbeError> {
        let endpoint = Url::parse(&format!("{}/auth/me", api_base.trim_end_matches('/')))?;
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(PROBE_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            token: RwLock::new(None),
        })
    }

    /// Install or replace the bearer token after login; `None` clears it.
    pub fn set_token(&self, token: Option<SecretString>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    fn bearer(&self) -> Option<String> {
        self.token.read().ok().and_then(|slot| {
            slot.as_ref()
                .map(|token| format!("Bearer {}", token.expose_secret()))
        })
    }
}

impl AuthProbe for HttpAuthProbe {
    fn check_session(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ProbeError>> + Send + '_>> {
        Box::pin(async move {
            // No credentials, no round-trip: the answer is already "no".
            let Some(bearer) = self.bearer() else {
                return Ok(false);
            };

            let response = self
                .client
                .get(self.endpoint.clone())
                .header(reqwest::header::AUTHORIZATION, bearer)
                .send()
                .await?;

            Ok(response.status().is_success())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use tokio::sync::Semaphore;

    /// Probe that resolves immediately with a fixed outcome.
    struct FakeProbe {
        authenticated: bool,
        fail: bool,
        calls: AtomicU64,
    }

    impl FakeProbe {
        fn answering(authenticated: bool) -> Self {
            Self {
                authenticated,
                fail: false,
                calls: AtomicU64::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                authenticated: false,
                fail: true,
                calls: AtomicU64::new(0),
            }
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AuthProbe for FakeProbe {
        fn check_session(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<bool, ProbeError>> + Send + '_>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = if self.fail {
                Err(ProbeError::Endpoint(url::ParseError::EmptyHost))
            } else {
                Ok(self.authenticated)
            };
            Box::pin(async move { outcome })
        }
    }

    /// Probe that blocks until the test releases it, to pin down ordering.
    struct BlockingProbe {
        authenticated: bool,
        started: Semaphore,
        release: Semaphore,
    }

    impl BlockingProbe {
        fn answering(authenticated: bool) -> Self {
            Self {
                authenticated,
                started: Semaphore::new(0),
                release: Semaphore::new(0),
            }
        }

        async fn wait_until_started(&self) {
            if let Ok(permit) = self.started.acquire().await {
                permit.forget();
            }
        }

        fn release_one(&self) {
            self.release.add_permits(1);
        }
    }

    impl AuthProbe for BlockingProbe {
        fn check_session(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<bool, ProbeError>> + Send + '_>> {
            Box::pin(async move {
                self.started.add_permits(1);
                if let Ok(permit) = self.release.acquire().await {
                    permit.forget();
                }
                Ok(self.authenticated)
            })
        }
    }

    fn guard_with(probe: Arc<dyn AuthProbe>) -> SessionGuard {
        SessionGuard::new(probe, RoutePolicy::default())
    }

    #[tokio::test]
    async fn public_route_renders_without_probe() {
        let probe = Arc::new(FakeProbe::answering(false));
        let guard = guard_with(probe.clone());

        assert_eq!(guard.evaluate("/login").await, Some(GuardDecision::Render));
        assert_eq!(guard.evaluate("/login/sso").await, Some(GuardDecision::Render));
        assert_eq!(guard.state(), GuardState::Allowed);
        assert_eq!(probe.calls(), 0, "allow-list must short-circuit the probe");
    }

    #[tokio::test]
    async fn anonymous_redirects_to_login() {
        let guard = guard_with(Arc::new(FakeProbe::answering(false)));

        assert_eq!(
            guard.evaluate("/vault").await,
            Some(GuardDecision::Redirect("/login".to_string()))
        );
        assert_eq!(guard.state(), GuardState::Redirecting);
    }

    #[tokio::test]
    async fn probe_failure_fails_closed() {
        let guard = guard_with(Arc::new(FakeProbe::failing()));

        assert_eq!(
            guard.evaluate("/vault").await,
            Some(GuardDecision::Redirect("/login".to_string()))
        );
    }

    #[tokio::test]
    async fn locked_vault_redirects_to_unlock() {
        let guard = guard_with(Arc::new(FakeProbe::answering(true)));

        assert_eq!(
            guard.evaluate("/vault").await,
            Some(GuardDecision::Redirect("/unlock".to_string()))
        );
    }

    #[tokio::test]
    async fn unlock_route_reachable_while_locked() {
        let guard = guard_with(Arc::new(FakeProbe::answering(true)));

        assert_eq!(guard.evaluate("/unlock").await, Some(GuardDecision::Render));
    }

    #[tokio::test]
    async fn authenticated_and_unlocked_renders() {
        let guard = guard_with(Arc::new(FakeProbe::answering(true)));
        guard.set_unlocked(true);

        assert_eq!(guard.evaluate("/vault").await, Some(GuardDecision::Render));
        assert_eq!(guard.state(), GuardState::Allowed);
    }

    #[tokio::test]
    async fn relocking_redirects_again() {
        let guard = guard_with(Arc::new(FakeProbe::answering(true)));

        guard.set_unlocked(true);
        assert_eq!(guard.evaluate("/vault").await, Some(GuardDecision::Render));

        guard.set_unlocked(false);
        assert_eq!(
            guard.evaluate("/vault").await,
            Some(GuardDecision::Redirect("/unlock".to_string()))
        );
    }

    #[tokio::test]
    async fn custom_policy_routes_are_honored() {
        let policy = RoutePolicy::new()
            .with_public_prefixes(vec!["/welcome".to_string()])
            .with_login_route("/signin".to_string())
            .with_unlock_route("/master".to_string());
        let guard = SessionGuard::new(Arc::new(FakeProbe::answering(false)), policy);

        assert_eq!(guard.evaluate("/welcome").await, Some(GuardDecision::Render));
        assert_eq!(
            guard.evaluate("/vault").await,
            Some(GuardDecision::Redirect("/signin".to_string()))
        );
    }

    #[tokio::test]
    async fn newer_evaluation_supersedes_older() {
        let probe = Arc::new(BlockingProbe::answering(false));
        let guard = Arc::new(guard_with(probe.clone()));

        let slow = tokio::spawn({
            let guard = guard.clone();
            async move { guard.evaluate("/vault").await }
        });
        probe.wait_until_started().await;

        // Navigating to a public route starts a newer evaluation.
        assert_eq!(guard.evaluate("/login").await, Some(GuardDecision::Render));

        probe.release_one();
        let stale = slow.await.unwrap();

        assert_eq!(stale, None, "stale result must be discarded");
        assert_eq!(guard.state(), GuardState::Allowed);
    }

    #[tokio::test]
    async fn unlock_supersedes_inflight_check() {
        let probe = Arc::new(BlockingProbe::answering(true));
        let guard = Arc::new(guard_with(probe.clone()));

        let slow = tokio::spawn({
            let guard = guard.clone();
            async move { guard.evaluate("/vault").await }
        });
        probe.wait_until_started().await;

        // Unlocking in another tab must invalidate the older check even
        // though its probe eventually answers "authenticated".
        guard.set_unlocked(true);
        probe.release_one();

        assert_eq!(slow.await.unwrap(), None);

        probe.release_one();
        assert_eq!(guard.evaluate("/vault").await, Some(GuardDecision::Render));
    }

    #[tokio::test]
    async fn new_evaluation_resets_to_checking() {
        let probe = Arc::new(BlockingProbe::answering(true));
        let guard = Arc::new(guard_with(probe.clone()));
        guard.set_unlocked(true);

        assert_eq!(guard.evaluate("/login").await, Some(GuardDecision::Render));
        assert_eq!(guard.state(), GuardState::Allowed);

        let slow = tokio::spawn({
            let guard = guard.clone();
            async move { guard.evaluate("/vault").await }
        });
        probe.wait_until_started().await;

        // Opening an evaluation leaves the previous terminal state at once;
        // the shell must not keep rendering on a stale Allowed.
        assert_eq!(guard.state(), GuardState::Checking);

        probe.release_one();
        assert_eq!(slow.await.unwrap(), Some(GuardDecision::Render));
        assert_eq!(guard.state(), GuardState::Allowed);
    }

    /// Same supersession contract, exercised across OS threads where the
    /// stale commit genuinely races the fresh one.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_result_cannot_overwrite_newer_state() {
        let probe = Arc::new(BlockingProbe::answering(false));
        let guard = Arc::new(guard_with(probe.clone()));

        let slow = tokio::spawn({
            let guard = guard.clone();
            async move { guard.evaluate("/vault").await }
        });
        probe.wait_until_started().await;

        assert_eq!(guard.evaluate("/login").await, Some(GuardDecision::Render));

        probe.release_one();
        assert_eq!(slow.await.unwrap(), None);

        // The stale Redirecting outcome must not have landed.
        assert_eq!(guard.state(), GuardState::Allowed);
    }
}

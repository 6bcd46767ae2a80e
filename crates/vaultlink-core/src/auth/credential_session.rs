//! Negotiation, persistence and expiry of the vault session token.
//!
//! `authenticate` runs an ordered list of unlock strategies. Each strategy
//! reports a `Negotiation`: established, fall through to the next strategy,
//! or fail outright. Concurrent callers presenting the same password share a
//! single in-flight negotiation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use subtle::ConstantTimeEq;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use super::crypto::{AeadSealer, PasswordSealer};
use super::session::{
    random_hex, Session, SessionPhase, SessionState, TokenIssuer, DEFAULT_TOKEN_TTL_SECS,
};
use super::store::{SessionStore, StoredSession};
use super::AuthError;
use crate::api::{ApiError, ExecuteOptions, Headers, RequestExecutor};

pub const SECURE_UNLOCK_ENDPOINT: &str = "/api/auth/secure-unlock";
pub const PLAIN_UNLOCK_ENDPOINT: &str = "/api/secrets/unlock";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime applied when the backend omits `expiresIn`, and to client-issued tokens.
    pub token_ttl_secs: i64,
    /// Try the encrypted unlock endpoint before the plain one.
    pub secure_unlock: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            secure_unlock: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockStrategy {
    /// Password sealed client-side, server issues the token.
    Secure,
    /// Password sent as-is over TLS, token synthesized locally.
    Plain,
}

/// Outcome of one strategy.
enum Negotiation {
    Established(Session),
    /// This strategy cannot be used; move on to the next one.
    Fallback(AuthError),
    Failed(AuthError),
}

#[derive(Debug, Deserialize)]
struct SecureUnlockResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "sessionToken")]
    session_token: Option<String>,
    #[serde(rename = "expiresIn")]
    expires_in: Option<i64>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlainUnlockResponse {
    #[serde(default)]
    success: bool,
    error: Option<String>,
}

type SharedNegotiation = Shared<BoxFuture<'static, Result<Session, AuthError>>>;

struct InFlight {
    password: Zeroizing<String>,
    future: SharedNegotiation,
}

impl InFlight {
    fn matches(&self, password: &str) -> bool {
        self.password.as_bytes().ct_eq(password.as_bytes()).into()
    }
}

struct Inner {
    executor: Arc<RequestExecutor>,
    state: Arc<SessionState>,
    store: Arc<dyn SessionStore>,
    sealer: Arc<dyn PasswordSealer>,
    config: SessionConfig,
    phase: Mutex<SessionPhase>,
    /// Bumped every time a session is installed.
    generation: AtomicU64,
    in_flight: tokio::sync::Mutex<Option<InFlight>>,
}

/// Owns the process session. Clone is cheap and shares state.
#[derive(Clone)]
pub struct CredentialSession {
    inner: Arc<Inner>,
}

impl CredentialSession {
    pub fn new(
        executor: Arc<RequestExecutor>,
        state: Arc<SessionState>,
        store: Arc<dyn SessionStore>,
        config: SessionConfig,
    ) -> Self {
        Self::with_sealer(executor, state, store, config, Arc::new(AeadSealer::default()))
    }

    pub fn with_sealer(
        executor: Arc<RequestExecutor>,
        state: Arc<SessionState>,
        store: Arc<dyn SessionStore>,
        config: SessionConfig,
        sealer: Arc<dyn PasswordSealer>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                state,
                store,
                sealer,
                config,
                phase: Mutex::new(SessionPhase::Unauthenticated),
                generation: AtomicU64::new(0),
                in_flight: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Read-only view shared with the executor.
    pub fn state(&self) -> &Arc<SessionState> {
        &self.inner.state
    }

    pub fn session_id(&self) -> &str {
        self.inner.state.session_id()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.is_authenticated()
    }

    pub fn is_expired(&self) -> bool {
        self.inner.state.is_expired()
    }

    pub fn auth_header(&self) -> Headers {
        self.inner.state.auth_headers()
    }

    pub fn phase(&self) -> SessionPhase {
        let phase = *self.inner.phase.lock().unwrap_or_else(|e| e.into_inner());
        if phase == SessionPhase::Authenticated && !self.is_authenticated() {
            SessionPhase::Expired
        } else {
            phase
        }
    }

    /// Establish a session from the vault password.
    ///
    /// Never retried here: a human typed this password and silent repeats
    /// could trip backend lockout policies.
    pub async fn authenticate(&self, password: &str) -> Result<Session, AuthError> {
        if password.is_empty() {
            return Err(AuthError::EmptyPassword);
        }

        let negotiation = loop {
            let mut slot = self.inner.in_flight.lock().await;
            let busy = match slot.as_ref() {
                Some(in_flight) if in_flight.matches(password) => {
                    debug!("Joining in-flight negotiation");
                    break in_flight.future.clone();
                }
                Some(in_flight) => Some(in_flight.future.clone()),
                None => None,
            };

            match busy {
                // A different password is being negotiated; wait our turn.
                Some(other) => {
                    drop(slot);
                    let _ = other.await;
                }
                None => {
                    let inner = self.inner.clone();
                    let owned = Zeroizing::new(password.to_string());
                    let future = async move { inner.negotiate_and_commit(owned).await }
                        .boxed()
                        .shared();
                    *slot = Some(InFlight {
                        password: Zeroizing::new(password.to_string()),
                        future: future.clone(),
                    });
                    break future;
                }
            }
        };

        negotiation.await
    }

    /// Reload a persisted token at startup.
    ///
    /// Legacy plaintext-password caches are purged first, unconditionally.
    /// A `true` result does not mean the vault is open; the backend still
    /// has to confirm that.
    pub fn restore(&self) -> bool {
        let inner = &self.inner;
        inner.purge_legacy();

        let stored = match inner.store.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("No persisted session");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable persisted session");
                inner.clear_persisted();
                return false;
            }
        };

        let now = inner.state.now();
        match stored.to_session() {
            Some(session) if session.is_authenticated(now) => {
                info!(expires_at = %session.expires_at, "Restored persisted session");
                inner.install(session);
                true
            }
            Some(_) => {
                debug!("Persisted session expired");
                inner.state.take();
                inner.clear_persisted();
                inner.set_phase(SessionPhase::Expired);
                false
            }
            None => {
                warn!("Discarding malformed persisted session");
                inner.state.take();
                inner.clear_persisted();
                false
            }
        }
    }

    /// Forget the session in memory and on disk, and purge legacy caches.
    pub fn clear(&self) {
        self.inner.clear();
        self.inner.set_phase(SessionPhase::Unauthenticated);
        info!("Session cleared");
    }

    /// Changes whenever a new session is installed. Observations taken under
    /// an older generation say nothing about the current session.
    pub(crate) fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// The backend no longer honours this session.
    pub(crate) fn invalidate(&self, reason: &str) {
        warn!(reason, "Invalidating session");
        self.inner.clear();
        self.inner.set_phase(SessionPhase::Invalidated);
    }

    /// Drop a session whose expiry has passed. Returns whether one was dropped.
    pub(crate) fn expire_stale(&self) -> bool {
        let state = &self.inner.state;
        if state.current().is_some() && !state.is_authenticated() {
            info!("Session expired");
            self.inner.clear();
            self.inner.set_phase(SessionPhase::Expired);
            true
        } else {
            false
        }
    }
}

impl Inner {
    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    fn strategies(&self) -> Vec<UnlockStrategy> {
        if self.config.secure_unlock {
            vec![UnlockStrategy::Secure, UnlockStrategy::Plain]
        } else {
            vec![UnlockStrategy::Plain]
        }
    }

    async fn negotiate_and_commit(
        self: Arc<Self>,
        password: Zeroizing<String>,
    ) -> Result<Session, AuthError> {
        let previous = *self.phase.lock().unwrap_or_else(|e| e.into_inner());
        self.set_phase(SessionPhase::Negotiating);

        let result = self.negotiate(&password).await;
        drop(password);

        match result {
            Ok(ref session) => self.commit(session.clone()),
            Err(ref e) => {
                debug!(error = %e, "Negotiation failed");
                let phase = if self.state.is_authenticated() {
                    SessionPhase::Authenticated
                } else if previous == SessionPhase::Negotiating {
                    SessionPhase::Unauthenticated
                } else {
                    previous
                };
                self.set_phase(phase);
            }
        }

        *self.in_flight.lock().await = None;
        result
    }

    async fn negotiate(&self, password: &str) -> Result<Session, AuthError> {
        let mut last_reason = None;
        for strategy in self.strategies() {
            let outcome = match strategy {
                UnlockStrategy::Secure => self.secure_unlock(password).await,
                UnlockStrategy::Plain => self.plain_unlock(password).await,
            };
            match outcome {
                Negotiation::Established(session) => {
                    debug!(?strategy, "Negotiation established");
                    return Ok(session);
                }
                Negotiation::Fallback(reason) => {
                    warn!(?strategy, reason = %reason, "Unlock strategy unavailable, falling back");
                    last_reason = Some(reason);
                }
                Negotiation::Failed(e) => return Err(e),
            }
        }
        Err(last_reason
            .unwrap_or_else(|| AuthError::Protocol("no unlock strategy configured".into())))
    }

    fn negotiation_options(body: serde_json::Value) -> ExecuteOptions {
        ExecuteOptions::post(body).max_retries(1)
    }

    async fn secure_unlock(&self, password: &str) -> Negotiation {
        let sealed = match self.sealer.seal(password) {
            Ok(sealed) => sealed,
            Err(e) => return Negotiation::Fallback(e),
        };

        let session_id = self.state.session_id();
        let key = sealed.key_b64();
        let body = json!({
            "encryptedPassword": sealed.ciphertext_b64(),
            "encryptionMetadata": {
                "algorithm": sealed.suite.algorithm(),
                "key": key.as_str(),
                "iv": sealed.iv_b64(),
                "sessionId": session_id,
                "timestamp": self.state.now().timestamp_millis(),
            },
            "sessionId": session_id,
            "isSecureAuth": true,
        });

        let response: SecureUnlockResponse = match self
            .executor
            .execute_json(SECURE_UNLOCK_ENDPOINT, Self::negotiation_options(body))
            .await
        {
            Ok(response) => response,
            Err(e) => return Negotiation::Fallback(AuthError::Api(e)),
        };

        if !response.success {
            let message = response
                .error
                .unwrap_or_else(|| "secure unlock refused".to_string());
            return Negotiation::Fallback(AuthError::Rejected(message));
        }

        let ttl = response
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(self.config.token_ttl_secs);
        let now = self.state.now();
        let session = match response.session_token.filter(|t| !t.is_empty()) {
            Some(token) => Session::new(token, ttl, TokenIssuer::Server, now),
            None => Session::new(client_token(), ttl, TokenIssuer::Client, now),
        };
        Negotiation::Established(session)
    }

    async fn plain_unlock(&self, password: &str) -> Negotiation {
        let body = json!({ "password": password });
        let response: PlainUnlockResponse = match self
            .executor
            .execute_json(PLAIN_UNLOCK_ENDPOINT, Self::negotiation_options(body))
            .await
        {
            Ok(response) => response,
            Err(ApiError::Client { message, .. }) => {
                return Negotiation::Failed(AuthError::Rejected(message))
            }
            Err(e) => return Negotiation::Failed(AuthError::Api(e)),
        };

        if !response.success {
            let message = response
                .error
                .unwrap_or_else(|| "Invalid password".to_string());
            return Negotiation::Failed(AuthError::Rejected(message));
        }

        let ttl = self.config.token_ttl_secs;
        Negotiation::Established(Session::new(
            client_token(),
            ttl,
            TokenIssuer::Client,
            self.state.now(),
        ))
    }

    fn commit(&self, session: Session) {
        info!(
            expires_at = %session.expires_at,
            issuer = ?session.issuer,
            "Session established"
        );
        if let Err(e) = self.store.save(&StoredSession::from_session(&session)) {
            error!(error = %e, "Failed to persist session");
        }
        self.install(session);
    }

    fn install(&self, session: Session) {
        self.state.set(session);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_phase(SessionPhase::Authenticated);
    }

    fn clear(&self) {
        self.state.take();
        self.clear_persisted();
        self.purge_legacy();
    }

    fn clear_persisted(&self) {
        if let Err(e) = self.store.clear() {
            error!(error = %e, "Failed to clear persisted session");
        }
    }

    fn purge_legacy(&self) {
        if let Err(e) = self.store.purge_legacy() {
            warn!(error = %e, "Failed to purge legacy password cache");
        }
    }
}

/// Locally minted bookkeeping token for the plain path.
fn client_token() -> String {
    random_hex(32).unwrap_or_else(|e| {
        warn!(error = %e, "OS random source unavailable, using fallback token");
        format!("local-{}", super::session::generate_session_id())
    })
}

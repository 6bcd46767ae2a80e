use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, Rng, RngCore};
use tracing::warn;

use crate::api::Headers;

/// Header carrying the bearer token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Correlation header accepted by every endpoint except health.
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Token lifetime when the backend does not say otherwise.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Longest lifetime honoured, whatever the backend or config asks for (30 days).
pub const MAX_TOKEN_TTL_SECS: i64 = 30 * 24 * 3600;

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for simulated-time tests. Clones share one instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn starting_now() -> Self {
        Self::at(Utc::now())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Who minted the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenIssuer {
    /// Issued by the backend's secure-unlock endpoint.
    Server,
    /// Synthesized locally after a plain unlock, for bookkeeping only.
    Client,
}

/// Client-held proof of a successful vault unlock.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub issuer: TokenIssuer,
}

impl Session {
    /// `ttl_secs` is clamped to `0..=MAX_TOKEN_TTL_SECS`.
    pub fn new(token: String, ttl_secs: i64, issuer: TokenIssuer, now: DateTime<Utc>) -> Self {
        let ttl = Duration::seconds(ttl_secs.clamp(0, MAX_TOKEN_TTL_SECS));
        Self {
            token,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            issuer,
        }
    }

    /// Usable strictly before `expires_at`.
    pub fn is_authenticated(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }
}

// Tokens never show up in logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// Lifecycle of the credential session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Negotiating,
    Authenticated,
    Expired,
    Invalidated,
}

/// Hex string from `len` OS-random bytes.
pub(crate) fn random_hex(len: usize) -> Result<String, rand::Error> {
    let mut bytes = vec![0u8; len];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(hex::encode(bytes))
}

/// 16 random bytes, hex-encoded; timestamp + thread RNG if the OS RNG fails.
pub fn generate_session_id() -> String {
    match random_hex(16) {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "OS random source unavailable, using fallback session id");
            format!(
                "{:x}-{:x}",
                Utc::now().timestamp_millis(),
                rand::thread_rng().gen::<u64>()
            )
        }
    }
}

/// The one session a process holds.
///
/// Shared by `Arc` between the executor (which reads auth headers) and the
/// credential session (the only writer).
pub struct SessionState {
    session_id: String,
    current: RwLock<Option<Session>>,
    clock: Arc<dyn Clock>,
}

impl SessionState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            session_id: generate_session_id(),
            current: RwLock::new(None),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn current(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.current().map(|s| s.expires_at)
    }

    /// Token present and not yet expired.
    pub fn is_authenticated(&self) -> bool {
        let now = self.now();
        self.current()
            .map(|s| s.is_authenticated(now))
            .unwrap_or(false)
    }

    /// `now > expires_at`; a missing session has nothing left to expire.
    pub fn is_expired(&self) -> bool {
        let now = self.now();
        self.current().map(|s| s.is_expired(now)).unwrap_or(false)
    }

    /// Bearer + session-id headers, empty when not authenticated.
    pub fn auth_headers(&self) -> Headers {
        let mut headers = Headers::new();
        let now = self.now();
        if let Some(session) = self.current().filter(|s| s.is_authenticated(now)) {
            headers.insert(
                AUTHORIZATION_HEADER.to_string(),
                format!("Bearer {}", session.token),
            );
            headers.insert(SESSION_ID_HEADER.to_string(), self.session_id.clone());
        }
        headers
    }

    pub(crate) fn set(&self, session: Session) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    pub(crate) fn take(&self) -> Option<Session> {
        self.current
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("session_id", &self.session_id)
            .field("current", &self.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_session(ttl: i64) -> (SessionState, ManualClock) {
        let clock = ManualClock::starting_now();
        let state = SessionState::new(Arc::new(clock.clone()));
        state.set(Session::new("tok".into(), ttl, TokenIssuer::Server, clock.now()));
        (state, clock)
    }

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_session_id());
    }

    #[test]
    fn test_session_id_stable_per_state() {
        let state = SessionState::with_system_clock();
        assert_eq!(state.session_id(), state.session_id());
    }

    #[test]
    fn test_empty_state_has_no_headers() {
        let state = SessionState::with_system_clock();
        assert!(!state.is_authenticated());
        assert!(!state.is_expired());
        assert!(state.auth_headers().is_empty());
    }

    #[test]
    fn test_headers_follow_expiry() {
        let (state, clock) = state_with_session(3600);

        clock.advance(Duration::seconds(3599));
        let headers = state.auth_headers();
        assert_eq!(headers[AUTHORIZATION_HEADER], "Bearer tok");
        assert_eq!(headers[SESSION_ID_HEADER], state.session_id());

        clock.advance(Duration::seconds(2));
        assert!(state.auth_headers().is_empty());
        assert!(!state.is_authenticated());
        assert!(state.is_expired());
    }

    #[test]
    fn test_expiry_boundary() {
        let (state, clock) = state_with_session(10);
        clock.advance(Duration::seconds(10));
        // at the instant: unusable, but not yet past
        assert!(!state.is_authenticated());
        assert!(!state.is_expired());
    }

    #[test]
    fn test_debug_redacts_token() {
        let (state, _) = state_with_session(60);
        let rendered = format!("{:?}", state);
        assert!(!rendered.contains("tok\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_ttl_is_clamped() {
        let now = Utc::now();
        let huge = Session::new("tok".into(), 1_000_000_000_000_000, TokenIssuer::Server, now);
        assert_eq!(huge.expires_at, now + Duration::seconds(MAX_TOKEN_TTL_SECS));

        let negative = Session::new("tok".into(), -5, TokenIssuer::Server, now);
        assert_eq!(negative.expires_at, now);
        assert!(!negative.is_authenticated(now));
    }

    #[test]
    fn test_take_clears() {
        let (state, _) = state_with_session(60);
        assert!(state.take().is_some());
        assert!(state.current().is_none());
        assert!(!state.is_authenticated());
    }
}

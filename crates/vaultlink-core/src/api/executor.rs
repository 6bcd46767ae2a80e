//! Request executor mediating every call to the control-plane API.
//!
//! Each call is bounded by a per-attempt deadline and, for transient
//! failures, retried with exponential backoff. The current session's auth
//! headers are attached automatically.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::response::{ApiResponse, ResponseBody};
use super::transport::{Headers, HttpRequest, HttpTransport, Method, Transport};
use super::ApiError;
use crate::auth::SessionState;
use crate::vault::{EventBus, VaultEvent};

// ============================================================================
// Constants
// ============================================================================

/// Default backend location when nothing is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Per-call deadline in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Total attempts for retryable failures, including the first.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before the first retry; doubles for every following one.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

/// Backoff schedule for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the given (1-based) failed attempt: `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(Duration::MAX)
    }
}

/// Per-call options. Unset fields fall back to the executor configuration.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub headers: Headers,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub base_delay: Option<Duration>,
    pub attach_session: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            method: Method::Get,
            body: None,
            headers: Headers::new(),
            timeout: None,
            max_retries: None,
            base_delay: None,
            attach_session: true,
        }
    }
}

impl ExecuteOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = Some(base_delay);
        self
    }

    /// Send without the session's auth headers (health probes).
    pub fn without_session(mut self) -> Self {
        self.attach_session = false;
        self
    }
}

/// Executes requests against the backend.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
    session: Option<Arc<SessionState>>,
    events: Option<EventBus>,
}

impl RequestExecutor {
    /// Create an executor backed by the reqwest transport.
    pub fn new(config: ExecutorConfig) -> Result<Self, ApiError> {
        let transport = HttpTransport::new().map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: ExecutorConfig) -> Self {
        Self {
            transport,
            config,
            session: None,
            events: None,
        }
    }

    /// Attach the session whose auth headers go out with every call.
    pub fn with_session(mut self, session: Arc<SessionState>) -> Self {
        self.session = Some(session);
        self
    }

    /// Publish `AuthRequired` when an authenticated call comes back 401.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Resolve an endpoint against the base URL. Absolute URLs pass through.
    pub fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!(
                "{}/{}",
                self.config.base_url.trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            )
        }
    }

    /// Defaults, then session auth, then caller headers. Caller wins.
    fn compose_headers(&self, options: &ExecuteOptions) -> (Headers, bool) {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), CONTENT_TYPE_JSON.to_string());

        let mut authenticated = false;
        if options.attach_session {
            if let Some(ref session) = self.session {
                let auth = session.auth_headers();
                authenticated = !auth.is_empty();
                headers.extend(auth);
            }
        }

        for (name, value) in &options.headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }
        (headers, authenticated)
    }

    /// Execute a call, retrying transient failures.
    pub async fn execute(
        &self,
        endpoint: &str,
        options: ExecuteOptions,
    ) -> Result<ApiResponse, ApiError> {
        let policy = RetryPolicy::new(
            options.max_retries.unwrap_or(self.config.max_retries),
            options.base_delay.unwrap_or(self.config.base_delay),
        );
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let (headers, authenticated) = self.compose_headers(&options);

        let request = HttpRequest {
            method: options.method,
            url: self.url(endpoint),
            headers,
            body: options.body,
        };

        let mut attempt = 1;
        loop {
            debug!(method = %request.method, endpoint, attempt, "Sending request");

            match self.attempt(endpoint, request.clone(), timeout).await {
                Ok(response) => return Ok(response),
                Err(err) if !err.is_retryable() => {
                    if authenticated && err.status() == Some(401) {
                        if let Some(ref events) = self.events {
                            events.publish(VaultEvent::AuthRequired);
                        }
                    }
                    debug!(endpoint, attempt, error = %err, "Terminal request failure");
                    return Err(err);
                }
                Err(err) => {
                    if attempt >= policy.max_attempts {
                        warn!(endpoint, attempts = attempt, error = %err, "Retries exhausted");
                        return Err(ApiError::RequestFailed {
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(
                        endpoint,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Execute and decode the success body.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: ExecuteOptions,
    ) -> Result<T, ApiError> {
        self.execute(endpoint, options).await?.json()
    }

    /// One bounded attempt. A missed deadline drops (cancels) the transport future.
    async fn attempt(
        &self,
        endpoint: &str,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<ApiResponse, ApiError> {
        let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Err(_) => {
                return Err(ApiError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout,
                })
            }
            Ok(Err(e)) => return Err(ApiError::Network(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let body = ResponseBody::parse(response.content_type.as_deref(), &response.body);
        if (200..300).contains(&response.status) {
            Ok(ApiResponse {
                status: response.status,
                body,
            })
        } else {
            Err(ApiError::from_status(response.status, body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Clock, ManualClock, Session, TokenIssuer};
    use crate::testing::{test_executor, Reply, ScriptedTransport, TEST_BASE_URL};
    use serde_json::json;
    use tokio::time::Instant;

    /// Timer wheel rounds deadlines up to the next millisecond.
    fn assert_close(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(5),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_url_resolution() {
        let transport = ScriptedTransport::new();
        let exec = test_executor(&transport);
        assert_eq!(exec.url("/api/health"), format!("{}/api/health", TEST_BASE_URL));
        assert_eq!(exec.url("api/health"), format!("{}/api/health", TEST_BASE_URL));
        assert_eq!(exec.url("https://other.test/x"), "https://other.test/x");
    }

    #[tokio::test]
    async fn test_success_returns_parsed_body() {
        let transport = ScriptedTransport::new();
        transport.on("/api/health", Reply::json(200, json!({"status": "ok"})));

        let response = test_executor(&transport)
            .execute("/api/health", ExecuteOptions::get())
            .await
            .unwrap();
        assert_eq!(response.body, ResponseBody::Json(json!({"status": "ok"})));
        assert_eq!(transport.calls("/api/health"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_statuses_back_off_exponentially() {
        for status in [429u16, 500, 502, 503] {
            let transport = ScriptedTransport::new();
            transport.on("/api/data", Reply::json(status, json!({"error": "busy"})));

            let err = test_executor(&transport)
                .execute("/api/data", ExecuteOptions::get())
                .await
                .unwrap_err();

            match err {
                ApiError::RequestFailed { attempts, ref last } => {
                    assert_eq!(attempts, 3);
                    assert_eq!(last.status(), Some(status));
                }
                other => panic!("unexpected {:?}", other),
            }

            let times = transport.request_times("/api/data");
            assert_eq!(times.len(), 3, "status {}", status);
            assert_close(times[1] - times[0], Duration::from_secs(1));
            assert_close(times[2] - times[1], Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_terminal() {
        for status in [400u16, 401, 403, 404, 422] {
            let transport = ScriptedTransport::new();
            transport.on("/api/data", Reply::json(status, json!({"error": "nope"})));

            let err = test_executor(&transport)
                .execute("/api/data", ExecuteOptions::get())
                .await
                .unwrap_err();

            assert!(matches!(err, ApiError::Client { status: s, .. } if s == status));
            assert_eq!(err.body(), Some(&ResponseBody::Json(json!({"error": "nope"}))));
            assert_eq!(transport.calls("/api/data"), 1, "status {}", status);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_never_retried() {
        let transport = ScriptedTransport::new();
        transport.on("/api/slow", Reply::Hang);

        let started = Instant::now();
        let err = test_executor(&transport)
            .execute(
                "/api/slow",
                ExecuteOptions::get().timeout(Duration::from_millis(500)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Timeout { .. }));
        assert!(err.is_timeout());
        assert_eq!(transport.calls("/api/slow"), 1);
        assert_close(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_retried_then_recovers() {
        let transport = ScriptedTransport::new();
        transport.on("/api/data", Reply::NetworkError);
        transport.on("/api/data", Reply::json(200, json!({"ok": true})));

        let response = test_executor(&transport)
            .execute("/api/data", ExecuteOptions::get())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.calls("/api/data"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_retry_override() {
        let transport = ScriptedTransport::new();
        transport.on("/api/data", Reply::json(500, json!({})));

        let err = test_executor(&transport)
            .execute(
                "/api/data",
                ExecuteOptions::get()
                    .max_retries(5)
                    .base_delay(Duration::from_millis(10)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::RequestFailed { attempts: 5, .. }));

        let times = transport.request_times("/api/data");
        assert_close(times[4] - times[3], Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_headers_compose_with_caller_winning() {
        let clock = ManualClock::starting_now();
        let state = Arc::new(SessionState::new(Arc::new(clock.clone())));
        state.set(Session {
            token: "tok".into(),
            expires_at: clock.now() + chrono::Duration::seconds(60),
            issuer: TokenIssuer::Server,
        });

        let transport = ScriptedTransport::new();
        transport.on("/api/data", Reply::json(200, json!({})));
        let exec = test_executor(&transport).with_session(state.clone());

        exec.execute(
            "/api/data",
            ExecuteOptions::get()
                .header("Content-Type", "text/plain")
                .header("X-Trace", "abc"),
        )
        .await
        .unwrap();

        let sent = transport.requests("/api/data").remove(0);
        assert_eq!(sent.headers["content-type"], "text/plain");
        assert_eq!(sent.headers["x-trace"], "abc");
        assert_eq!(sent.headers["authorization"], "Bearer tok");
        assert_eq!(sent.headers["x-session-id"], state.session_id());
    }

    #[tokio::test]
    async fn test_without_session_omits_auth() {
        let clock = ManualClock::starting_now();
        let state = Arc::new(SessionState::new(Arc::new(clock.clone())));
        state.set(Session {
            token: "tok".into(),
            expires_at: clock.now() + chrono::Duration::seconds(60),
            issuer: TokenIssuer::Server,
        });

        let transport = ScriptedTransport::new();
        transport.on("/api/health", Reply::json(200, json!({})));
        test_executor(&transport)
            .with_session(state)
            .execute("/api/health", ExecuteOptions::get().without_session())
            .await
            .unwrap();

        let sent = transport.requests("/api/health").remove(0);
        assert!(!sent.headers.contains_key("authorization"));
        assert_eq!(sent.headers["content-type"], CONTENT_TYPE_JSON);
    }

    #[tokio::test]
    async fn test_unauthorized_publishes_auth_required() {
        let clock = ManualClock::starting_now();
        let state = Arc::new(SessionState::new(Arc::new(clock.clone())));
        state.set(Session {
            token: "tok".into(),
            expires_at: clock.now() + chrono::Duration::seconds(60),
            issuer: TokenIssuer::Server,
        });
        let events = EventBus::new();
        let mut rx = events.subscribe();

        let transport = ScriptedTransport::new();
        transport.on("/api/profiles", Reply::json(401, json!({"error": "expired"})));
        let _ = test_executor(&transport)
            .with_session(state)
            .with_events(events)
            .execute("/api/profiles", ExecuteOptions::get())
            .await;

        assert_eq!(rx.try_recv().unwrap(), VaultEvent::AuthRequired);
    }
}

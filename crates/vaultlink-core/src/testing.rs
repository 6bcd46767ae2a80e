//! Shared test doubles: a scripted transport that replays canned replies per path.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::api::{ExecutorConfig, HttpRequest, HttpResponse, RequestExecutor, Transport, TransportError};
use crate::auth::{CredentialSession, ManualClock, MemorySessionStore, SessionConfig, SessionState, StoredSession};
use crate::vault::{EventBus, VaultStatusCoordinator};

pub(crate) const TEST_BASE_URL: &str = "http://vault.test";

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Json(u16, Value),
    NetworkError,
    /// Never completes; only a deadline ends the call.
    Hang,
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub(crate) fn json(status: u16, body: Value) -> Self {
        Reply::Json(status, body)
    }

    pub(crate) fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed(delay, Box::new(reply))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub(crate) request: HttpRequest,
    pub(crate) at: Instant,
}

/// Replies are queued per path; the last queued reply for a path repeats.
/// Unknown paths answer 404.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    recorded: Mutex<Vec<(String, Recorded)>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn on(&self, path: &str, reply: Reply) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Drop anything queued for `path` and answer with `reply` from now on.
    pub(crate) fn set(&self, path: &str, reply: Reply) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), VecDeque::from([reply]));
        self
    }

    pub(crate) fn calls(&self, path: &str) -> usize {
        self.recorded
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    pub(crate) fn requests(&self, path: &str) -> Vec<HttpRequest> {
        self.recorded
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, r)| r.request.clone())
            .collect()
    }

    pub(crate) fn request_times(&self, path: &str) -> Vec<Instant> {
        self.recorded
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, r)| r.at)
            .collect()
    }

    fn next_reply(&self, path: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Reply::Json(404, serde_json::json!({"error": "not found"})),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let path = request
            .url
            .strip_prefix(TEST_BASE_URL)
            .unwrap_or(&request.url)
            .to_string();
        self.recorded.lock().unwrap().push((
            path.clone(),
            Recorded {
                request,
                at: Instant::now(),
            },
        ));

        let mut reply = self.next_reply(&path);
        loop {
            match reply {
                Reply::Json(status, body) => {
                    return Ok(HttpResponse {
                        status,
                        content_type: Some("application/json".to_string()),
                        body: serde_json::to_vec(&body).unwrap(),
                    })
                }
                Reply::NetworkError => {
                    return Err(TransportError("connection refused".to_string()))
                }
                Reply::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
                Reply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

pub(crate) fn test_executor(transport: &Arc<ScriptedTransport>) -> RequestExecutor {
    RequestExecutor::with_transport(
        transport.clone(),
        ExecutorConfig {
            base_url: TEST_BASE_URL.to_string(),
            ..ExecutorConfig::default()
        },
    )
}

/// Everything wired together the way the CLI wires it, over a scripted transport.
pub(crate) struct Stack {
    pub(crate) transport: Arc<ScriptedTransport>,
    pub(crate) clock: ManualClock,
    pub(crate) store: Arc<MemorySessionStore>,
    pub(crate) session: CredentialSession,
    pub(crate) events: EventBus,
    pub(crate) coordinator: Arc<VaultStatusCoordinator>,
}

pub(crate) fn stack(persisted: Option<StoredSession>) -> Stack {
    let transport = ScriptedTransport::new();
    let clock = ManualClock::starting_now();
    let state = Arc::new(SessionState::new(Arc::new(clock.clone())));
    let events = EventBus::new();
    let executor = Arc::new(
        test_executor(&transport)
            .with_session(state.clone())
            .with_events(events.clone()),
    );
    let store = Arc::new(match persisted {
        Some(stored) => MemorySessionStore::with_stored(stored),
        None => MemorySessionStore::new(),
    });
    let session = CredentialSession::new(
        executor.clone(),
        state,
        store.clone(),
        SessionConfig::default(),
    );
    let coordinator = Arc::new(VaultStatusCoordinator::new(
        executor,
        session.clone(),
        events.clone(),
    ));
    Stack {
        transport,
        clock,
        store,
        session,
        events,
        coordinator,
    }
}

//! Keeps the client's idea of the vault in line with the backend.
//!
//! The backend is the source of truth. After any completed refresh, a
//! backend reporting the vault locked means the local session is gone.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::events::{EventBus, VaultEvent};
use super::status::{VaultState, VaultStatus};
use crate::api::{ApiError, ExecuteOptions, RequestExecutor};
use crate::auth::CredentialSession;

// ===== Constants =====

pub const STATUS_ENDPOINT: &str = "/api/secrets/info";

pub const DEFAULT_DEBOUNCE_MS: u64 = 250;
pub const MIN_DEBOUNCE_MS: u64 = 100;
pub const MAX_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Default)]
struct Snapshot {
    state: Option<VaultState>,
    status: Option<VaultStatus>,
}

pub struct VaultStatusCoordinator {
    executor: Arc<RequestExecutor>,
    session: CredentialSession,
    events: EventBus,
    debounce: Duration,
    snapshot: RwLock<Snapshot>,
    /// Held for the duration of a refresh; stamps when the last one finished.
    last_refresh: tokio::sync::Mutex<Option<Instant>>,
}

impl VaultStatusCoordinator {
    pub fn new(executor: Arc<RequestExecutor>, session: CredentialSession, events: EventBus) -> Self {
        Self {
            executor,
            session,
            events,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            snapshot: RwLock::new(Snapshot::default()),
            last_refresh: tokio::sync::Mutex::new(None),
        }
    }

    /// Window in which repeated debounced refreshes coalesce, clamped to 100-500ms.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce.clamp(
            Duration::from_millis(MIN_DEBOUNCE_MS),
            Duration::from_millis(MAX_DEBOUNCE_MS),
        );
        self
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn session(&self) -> &CredentialSession {
        &self.session
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> VaultState {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .state
            .unwrap_or(VaultState::Checking)
    }

    /// Last status the backend reported, if any refresh has completed.
    pub fn status(&self) -> Option<VaultStatus> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .status
            .clone()
    }

    /// Ask the backend for the vault status and reconcile the local session with it.
    pub async fn refresh(&self) -> Result<VaultStatus, ApiError> {
        let mut last = self.last_refresh.lock().await;
        let result = self.fetch_and_apply().await;
        *last = Some(Instant::now());
        result
    }

    /// Like `refresh`, but triggers landing within the debounce window of a
    /// completed refresh reuse its result instead of hitting the backend.
    pub async fn refresh_debounced(&self) -> Result<VaultStatus, ApiError> {
        let mut last = self.last_refresh.lock().await;
        if let Some(at) = *last {
            if at.elapsed() < self.debounce {
                if let Some(status) = self.status() {
                    debug!("Coalesced vault status refresh");
                    return Ok(status);
                }
            }
        }
        let result = self.fetch_and_apply().await;
        *last = Some(Instant::now());
        result
    }

    /// Startup: restore any persisted token, then let the backend confirm it.
    /// A token the backend does not confirm is cleared. Never returns `Checking`.
    pub async fn reconcile_on_startup(&self) -> VaultState {
        let restored = self.session.restore();
        match self.refresh().await {
            Ok(status) if status.unlocked => {
                if restored {
                    info!("Backend confirmed restored session");
                }
            }
            Ok(_) => {
                if restored {
                    info!("Backend reports vault locked, discarding restored session");
                    self.session.clear();
                }
            }
            Err(e) => {
                warn!(error = %e, "Vault status unavailable at startup, assuming locked");
                if restored {
                    self.session.clear();
                }
                self.transition(VaultState::Locked, None);
            }
        }
        self.state()
    }

    /// The user declined to unlock for now.
    pub fn skip(&self) {
        info!("Vault unlock skipped");
        self.transition(VaultState::Locked, None);
        self.events.publish(VaultEvent::UnlockSkipped);
    }

    /// Refresh on a fixed interval until the handle is aborted.
    pub fn spawn_polling(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = coordinator.refresh_debounced().await {
                    debug!(error = %e, "Vault status poll failed");
                }
            }
        })
    }

    /// A status fetched while a new session was being installed describes the
    /// old one, so it is fetched once more before anything is applied.
    async fn fetch_and_apply(&self) -> Result<VaultStatus, ApiError> {
        let mut generation = self.session.generation();
        let mut status = self.fetch().await?;
        if self.session.generation() != generation {
            debug!("Session changed during status fetch, refetching");
            generation = self.session.generation();
            status = self.fetch().await?;
        }
        if self.session.generation() == generation {
            self.apply(&status);
        } else {
            debug!("Session changed again during status fetch, not applying");
        }
        Ok(status)
    }

    async fn fetch(&self) -> Result<VaultStatus, ApiError> {
        self.executor
            .execute_json(STATUS_ENDPOINT, ExecuteOptions::get())
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to fetch vault status");
                e
            })
    }

    fn apply(&self, status: &VaultStatus) {
        if !status.unlocked && self.session.is_authenticated() {
            warn!(
                condition = "VaultStateMismatch",
                provider = ?status.provider,
                "Backend reports vault locked while local session is authenticated"
            );
            self.session.invalidate("backend reports vault locked");
        }
        if self.session.expire_stale() {
            self.events.publish(VaultEvent::AuthRequired);
        }

        let next = VaultState::derive(status, self.session.is_authenticated());
        self.transition(next, Some(status.clone()));
    }

    fn transition(&self, next: VaultState, status: Option<VaultStatus>) {
        let previous = {
            let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
            if status.is_some() {
                snapshot.status = status;
            }
            snapshot.state.replace(next).unwrap_or(VaultState::Checking)
        };
        if previous != next {
            info!(from = %previous, to = %next, "Vault state changed");
            self.events.publish(VaultEvent::StatusChanged {
                from: previous,
                to: next,
            });
        }
    }
}

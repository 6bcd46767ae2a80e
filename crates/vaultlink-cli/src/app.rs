//! Wires the core library together from configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use vaultlink_core::api::HealthMonitor;
use vaultlink_core::auth::{
    AeadSealer, CredentialSession, FileSessionStore, LegacyKeychain, SessionState,
};
use vaultlink_core::{Config, EventBus, RequestExecutor, UnlockFlow, VaultStatusCoordinator};

pub struct App {
    pub config: Config,
    pub executor: Arc<RequestExecutor>,
    pub session: CredentialSession,
    pub events: EventBus,
    pub coordinator: Arc<VaultStatusCoordinator>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let cache_dir = config.cache_dir().unwrap_or_else(|e| {
            warn!(error = %e, "No cache directory, using ./cache");
            PathBuf::from("./cache")
        });
        debug!(base_url = %config.base_url, cache_dir = %cache_dir.display(), "Starting");

        let events = EventBus::new();
        let state = Arc::new(SessionState::with_system_clock());
        let executor = Arc::new(
            RequestExecutor::new(config.executor_config())
                .context("Failed to create HTTP client")?
                .with_session(state.clone())
                .with_events(events.clone()),
        );

        let mut store = FileSessionStore::new(cache_dir);
        if config.purge_legacy_keychain {
            store = store.with_legacy_keychain(LegacyKeychain::default());
        }
        let session = CredentialSession::with_sealer(
            executor.clone(),
            state,
            Arc::new(store),
            config.session_config(),
            Arc::new(AeadSealer::new(config.cipher)),
        );
        let coordinator = Arc::new(
            VaultStatusCoordinator::new(executor.clone(), session.clone(), events.clone())
                .with_debounce(config.status_debounce()),
        );

        Ok(Self {
            config,
            executor,
            session,
            events,
            coordinator,
        })
    }

    pub fn unlock_flow(&self) -> UnlockFlow {
        UnlockFlow::new(self.coordinator.clone()).with_max_attempts(self.config.max_unlock_attempts)
    }

    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(self.executor.clone(), self.events.clone())
    }
}

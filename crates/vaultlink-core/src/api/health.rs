//! Backend liveness probe, tracked separately from vault status.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use super::{ExecuteOptions, RequestExecutor};
use crate::vault::{EventBus, VaultEvent};

pub const HEALTH_ENDPOINT: &str = "/api/health";

/// Health checks should answer quickly; a slow backend counts as offline.
const HEALTH_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

pub struct HealthMonitor {
    executor: Arc<RequestExecutor>,
    events: EventBus,
    last: Mutex<Option<Connectivity>>,
}

impl HealthMonitor {
    pub fn new(executor: Arc<RequestExecutor>, events: EventBus) -> Self {
        Self {
            executor,
            events,
            last: Mutex::new(None),
        }
    }

    /// Probe the backend once. Publishes `ConnectivityChanged` on transitions.
    pub async fn check(&self) -> Connectivity {
        let options = ExecuteOptions::get()
            .without_session()
            .max_retries(1)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS));

        let connectivity = match self.executor.execute(HEALTH_ENDPOINT, options).await {
            Ok(_) => Connectivity::Online,
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                Connectivity::Offline
            }
        };

        let previous = {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            last.replace(connectivity)
        };
        if previous != Some(connectivity) {
            info!(?connectivity, "Backend connectivity changed");
            self.events.publish(VaultEvent::ConnectivityChanged(connectivity));
        }
        connectivity
    }

    /// Last observed connectivity, `None` before the first probe.
    pub fn last(&self) -> Option<Connectivity> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

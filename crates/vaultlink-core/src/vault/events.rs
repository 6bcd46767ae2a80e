//! Process-wide notifications, delivered over a broadcast channel.
//!
//! Publishing never waits on or fails because of subscribers; a lagging
//! receiver simply misses old events.

use tokio::sync::broadcast;
use tracing::trace;

use super::status::VaultState;
use crate::api::Connectivity;

/// Buffer size for the event channel.
/// Events are rare (user actions, status transitions); 32 leaves headroom.
const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultEvent {
    Unlocked,
    UnlockSkipped,
    AuthRequired,
    StatusChanged { from: VaultState, to: VaultState },
    ConnectivityChanged(Connectivity),
}

impl VaultEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VaultEvent::Unlocked => "unlocked",
            VaultEvent::UnlockSkipped => "unlock-skipped",
            VaultEvent::AuthRequired => "auth-required",
            VaultEvent::StatusChanged { .. } => "status-changed",
            VaultEvent::ConnectivityChanged(_) => "connectivity-changed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VaultEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.tx.subscribe()
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: VaultEvent) -> usize {
        trace!(event = event.name(), "Publishing event");
        self.tx.send(event).unwrap_or(0)
    }
}

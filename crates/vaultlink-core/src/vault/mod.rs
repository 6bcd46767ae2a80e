//! Vault status: what the backend reports, what the UI shows, and the
//! events that connect the two.

pub mod coordinator;
pub mod events;
pub mod status;

pub use coordinator::{VaultStatusCoordinator, STATUS_ENDPOINT};
pub use events::{EventBus, VaultEvent};
pub use status::{VaultProvider, VaultState, VaultStatus};

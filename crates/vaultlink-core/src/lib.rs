//! vaultlink core: the resilience and credential-session layer a client
//! uses to talk to the control-plane backend.
//!
//! - `api`: the `RequestExecutor` every backend call goes through
//! - `auth`: the `CredentialSession` that negotiates and expires vault tokens
//! - `vault`: backend-authoritative vault status and the event bus
//! - `unlock`: the interactive unlock flow
//! - `config`: on-disk configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod unlock;
pub mod vault;

#[cfg(test)]
mod testing;

pub use api::{ApiError, ExecuteOptions, RequestExecutor};
pub use auth::{AuthError, CredentialSession, Session};
pub use config::Config;
pub use unlock::{PasswordPrompt, UnlockFlow, UnlockOutcome};
pub use vault::{EventBus, VaultEvent, VaultState, VaultStatusCoordinator};

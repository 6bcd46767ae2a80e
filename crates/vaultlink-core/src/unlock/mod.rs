//! Interactive unlock: password attempts, the lockout warning, and handing
//! the result back to the vault status coordinator.
//!
//! The counter only warns. Whether the vault actually locks out is the
//! backend's decision, so a fourth attempt is still sent.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::auth::{AuthError, Session};
use crate::vault::{VaultEvent, VaultStatusCoordinator};

pub const DEFAULT_MAX_UNLOCK_ATTEMPTS: u32 = 3;

pub const LOCKOUT_WARNING: &str =
    "Multiple failed attempts. Further failures may temporarily lock the vault.";

#[derive(Debug, Clone)]
pub enum UnlockOutcome {
    Unlocked(Session),
    Rejected {
        message: String,
        attempts: u32,
        lockout_warning: bool,
    },
    /// Could not get an answer about the password at all.
    Failed(AuthError),
    Skipped,
}

impl UnlockOutcome {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, UnlockOutcome::Unlocked(_))
    }
}

/// Source of passwords for `UnlockFlow::run`.
#[async_trait]
pub trait PasswordPrompt: Send {
    /// `None` means the user chose to skip. `previous` is the outcome of the
    /// last attempt in this run, if any.
    async fn ask(&mut self, previous: Option<&UnlockOutcome>) -> Option<Zeroizing<String>>;
}

pub struct UnlockFlow {
    coordinator: Arc<VaultStatusCoordinator>,
    max_attempts: u32,
    attempts: AtomicU32,
}

impl UnlockFlow {
    pub fn new(coordinator: Arc<VaultStatusCoordinator>) -> Self {
        Self {
            coordinator,
            max_attempts: DEFAULT_MAX_UNLOCK_ATTEMPTS,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Failed attempts since the last success or reset.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// One unlock attempt. The password is wiped as soon as negotiation ends.
    pub async fn submit(&self, password: Zeroizing<String>) -> UnlockOutcome {
        let result = self.coordinator.session().authenticate(&password).await;
        drop(password);

        match result {
            Ok(session) => {
                self.reset();
                if let Err(e) = self.coordinator.refresh().await {
                    warn!(error = %e, "Vault status refresh after unlock failed");
                }
                // the backend may have locked the vault again in the meantime
                if !self.coordinator.session().is_authenticated() {
                    warn!("Session discarded right after unlock");
                    return UnlockOutcome::Failed(AuthError::Protocol(
                        "vault reported locked right after unlock".to_string(),
                    ));
                }
                self.coordinator.events().publish(VaultEvent::Unlocked);
                info!(issuer = ?session.issuer, "Vault unlocked");
                UnlockOutcome::Unlocked(session)
            }
            Err(AuthError::Rejected(message)) => {
                let attempts = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let lockout_warning = attempts >= self.max_attempts;
                if lockout_warning {
                    warn!(attempts, "Repeated unlock failures");
                } else {
                    debug!(attempts, "Unlock rejected");
                }
                UnlockOutcome::Rejected {
                    message,
                    attempts,
                    lockout_warning,
                }
            }
            Err(e) => {
                warn!(error = %e, "Unlock failed");
                UnlockOutcome::Failed(e)
            }
        }
    }

    /// Prompt until the vault opens or the user skips.
    pub async fn run<P: PasswordPrompt + ?Sized>(&self, prompt: &mut P) -> UnlockOutcome {
        let mut previous: Option<UnlockOutcome> = None;
        loop {
            let Some(password) = prompt.ask(previous.as_ref()).await else {
                self.coordinator.skip();
                return UnlockOutcome::Skipped;
            };
            let outcome = self.submit(password).await;
            if outcome.is_unlocked() {
                return outcome;
            }
            previous = Some(outcome);
        }
    }
}

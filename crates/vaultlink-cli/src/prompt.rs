use async_trait::async_trait;
use tracing::warn;
use zeroize::Zeroizing;

use vaultlink_core::unlock::LOCKOUT_WARNING;
use vaultlink_core::{PasswordPrompt, UnlockOutcome};

/// Reads the vault password from the terminal without echo.
/// An empty line skips unlocking.
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn report(previous: &UnlockOutcome) {
        match previous {
            UnlockOutcome::Rejected {
                message,
                lockout_warning,
                ..
            } => {
                eprintln!("✗ {}", message);
                if *lockout_warning {
                    eprintln!("  {}", LOCKOUT_WARNING);
                }
            }
            UnlockOutcome::Failed(e) if e.is_connectivity() => {
                eprintln!("✗ Backend unreachable: {}", e);
            }
            UnlockOutcome::Failed(e) => eprintln!("✗ {}", e),
            UnlockOutcome::Unlocked(_) | UnlockOutcome::Skipped => {}
        }
    }
}

#[async_trait]
impl PasswordPrompt for TerminalPrompt {
    async fn ask(&mut self, previous: Option<&UnlockOutcome>) -> Option<Zeroizing<String>> {
        if let Some(previous) = previous {
            Self::report(previous);
        }

        let read = tokio::task::spawn_blocking(|| {
            rpassword::prompt_password("Vault password (empty to skip): ").map(Zeroizing::new)
        })
        .await;

        match read {
            Ok(Ok(password)) if !password.is_empty() => Some(password),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read password");
                None
            }
            Err(e) => {
                warn!(error = %e, "Password prompt task failed");
                None
            }
        }
    }
}

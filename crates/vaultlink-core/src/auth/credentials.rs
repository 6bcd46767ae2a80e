use anyhow::{Context, Result};
use keyring::Entry;
use tracing::{debug, info};

/// Keychain service older clients stored the vault password under.
pub const LEGACY_SERVICE_NAME: &str = "vaultlink";

/// Account name older clients used for the cached vault password.
pub const LEGACY_ACCOUNT: &str = "vault-password";

/// Plaintext vault-password cache left in the OS keychain by older clients.
///
/// Nothing reads from it anymore; it only exists so startup and logout can
/// remove it.
pub struct LegacyKeychain {
    service: String,
    account: String,
}

impl Default for LegacyKeychain {
    fn default() -> Self {
        Self::new(LEGACY_SERVICE_NAME, LEGACY_ACCOUNT)
    }
}

impl LegacyKeychain {
    pub fn new(service: &str, account: &str) -> Self {
        Self {
            service: service.to_string(),
            account: account.to_string(),
        }
    }

    /// Delete the cached password. Returns whether an entry was removed.
    pub fn purge(&self) -> Result<bool> {
        let entry = Entry::new(&self.service, &self.account)
            .context("Failed to create keyring entry")?;
        match entry.delete_credential() {
            Ok(()) => {
                info!(service = %self.service, "Removed legacy keychain password");
                Ok(true)
            }
            Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service, "No legacy keychain password present");
                Ok(false)
            }
            Err(e) => Err(e).context("Failed to delete legacy credential from keychain"),
        }
    }
}

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Storage backend behind the vault, as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VaultProvider {
    VaultManager,
    OsKeychain,
    InMemory,
    #[default]
    Unknown,
}

impl VaultProvider {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "vault-manager" | "vault" | "secret-manager" => VaultProvider::VaultManager,
            "os-keychain" | "keychain" | "keytar" | "keyring" => VaultProvider::OsKeychain,
            "in-memory" | "memory" => VaultProvider::InMemory,
            _ => VaultProvider::Unknown,
        }
    }
}

fn provider_or_unknown<'de, D>(deserializer: D) -> Result<VaultProvider, D::Error>
where
    D: Deserializer<'de>,
{
    let name: Option<String> = Option::deserialize(deserializer)?;
    Ok(name
        .as_deref()
        .map(VaultProvider::from_name)
        .unwrap_or_default())
}

/// The backend's authoritative view of the vault (`GET /api/secrets/info`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStatus {
    #[serde(default, deserialize_with = "provider_or_unknown")]
    pub provider: VaultProvider,
    #[serde(rename = "isSecretManagementAvailable", default)]
    pub management_available: bool,
    #[serde(rename = "isSecretStoreAvailable", default)]
    pub available: bool,
    #[serde(rename = "isSecretStoreUnlocked", default)]
    pub unlocked: bool,
}

/// What UI indicators show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultState {
    /// Status not yet known.
    Checking,
    Locked,
    Unlocked,
    /// No persistent vault exists.
    Unavailable,
}

impl VaultState {
    /// Unlocked only when the backend says so and we hold a live session.
    pub fn derive(status: &VaultStatus, authenticated: bool) -> Self {
        if status.unlocked && authenticated {
            VaultState::Unlocked
        } else if !status.available {
            VaultState::Unavailable
        } else {
            VaultState::Locked
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VaultState::Checking => "checking",
            VaultState::Locked => "locked",
            VaultState::Unlocked => "unlocked",
            VaultState::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Durable storage for the session token across restarts.
//!
//! Only two string entries ever survive a reload: `session-token` and
//! `session-expiry` (RFC 3339). No password material is persisted.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::credentials::LegacyKeychain;
use super::session::{Session, TokenIssuer};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Plaintext password file written by older clients.
const LEGACY_PASSWORD_FILE: &str = "vault-password";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(rename = "session-token")]
    pub token: String,
    #[serde(rename = "session-expiry")]
    pub expires_at: String,
}

impl StoredSession {
    pub fn from_session(session: &Session) -> Self {
        Self {
            token: session.token.clone(),
            expires_at: session.expires_at.to_rfc3339(),
        }
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.expires_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Rebuild a session; `None` when the expiry cannot be parsed or the token is blank.
    /// Restored tokens count as server-issued: the issuer is not persisted.
    pub fn to_session(&self) -> Option<Session> {
        if self.token.trim().is_empty() {
            return None;
        }
        Some(Session {
            token: self.token.clone(),
            expires_at: self.expiry()?,
            issuer: TokenIssuer::Server,
        })
    }
}

impl fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredSession")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredSession>>;

    fn save(&self, stored: &StoredSession) -> Result<()>;

    fn clear(&self) -> Result<()>;

    /// Remove plaintext-password caches left behind by older clients.
    fn purge_legacy(&self) -> Result<()> {
        Ok(())
    }
}

/// JSON file in the cache directory.
pub struct FileSessionStore {
    dir: PathBuf,
    keychain: Option<LegacyKeychain>,
}

impl FileSessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            keychain: None,
        }
    }

    /// Also purge the legacy OS-keychain password entry.
    pub fn with_legacy_keychain(mut self, keychain: LegacyKeychain) -> Self {
        self.keychain = Some(keychain);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn legacy_path(&self) -> PathBuf {
        self.dir.join(LEGACY_PASSWORD_FILE)
    }

    #[cfg(unix)]
    fn restrict_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .context("Failed to restrict session file permissions")
    }

    #[cfg(not(unix))]
    fn restrict_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let stored: StoredSession =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(stored))
    }

    fn save(&self, stored: &StoredSession) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context("Failed to create session directory")?;
        let path = self.session_path();
        let contents = serde_json::to_string_pretty(stored)?;
        std::fs::write(&path, contents).context("Failed to write session file")?;
        Self::restrict_permissions(&path)?;
        debug!(path = %path.display(), "Session persisted");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove session file")?;
        }
        Ok(())
    }

    fn purge_legacy(&self) -> Result<()> {
        let legacy = self.legacy_path();
        if legacy.exists() {
            std::fs::remove_file(&legacy).context("Failed to remove legacy password file")?;
            info!(path = %legacy.display(), "Removed legacy plaintext password cache");
        }
        if let Some(ref keychain) = self.keychain {
            keychain.purge()?;
        }
        Ok(())
    }
}

/// In-process store for ephemeral runs and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    stored: Mutex<Option<StoredSession>>,
    legacy_password: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with a previously persisted session.
    pub fn with_stored(stored: StoredSession) -> Self {
        let store = Self::default();
        *store.stored.lock().unwrap_or_else(|e| e.into_inner()) = Some(stored);
        store
    }

    /// Seed a legacy plaintext password, as an older client would have left it.
    pub fn with_legacy_password(self, password: &str) -> Self {
        *self.legacy_password.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(password.to_string());
        self
    }

    pub fn stored(&self) -> Option<StoredSession> {
        self.stored.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn has_legacy_password(&self) -> bool {
        self.legacy_password
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<StoredSession>> {
        Ok(self.stored())
    }

    fn save(&self, stored: &StoredSession) -> Result<()> {
        *self.stored.lock().unwrap_or_else(|e| e.into_inner()) = Some(stored.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.stored.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    fn purge_legacy(&self) -> Result<()> {
        *self.legacy_password.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stored(expires_at: DateTime<Utc>) -> StoredSession {
        StoredSession {
            token: "tok".into(),
            expires_at: expires_at.to_rfc3339(),
        }
    }

    #[test]
    fn test_file_layout_has_two_string_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        store.save(&stored(Utc::now())).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(SESSION_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert!(object["session-token"].is_string());
        assert!(object["session-expiry"].is_string());
    }

    #[test]
    fn test_file_store_load_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested"));
        assert!(store.load().unwrap().is_none());

        let expires = Utc::now() + Duration::hours(1);
        store.save(&stored(expires)).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.token, "tok");
        assert_eq!(loaded.expiry().unwrap().timestamp(), expires.timestamp());

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SESSION_FILE), "{not json").unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        assert!(store.load().is_err());
    }

    #[test]
    fn test_purge_removes_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join(LEGACY_PASSWORD_FILE);
        std::fs::write(&legacy, "hunter2").unwrap();

        let store = FileSessionStore::new(dir.path().to_path_buf());
        store.purge_legacy().unwrap();
        assert!(!legacy.exists());
        store.purge_legacy().unwrap();
    }

    #[test]
    fn test_to_session_rejects_garbage() {
        let bad_expiry = StoredSession {
            token: "tok".into(),
            expires_at: "tomorrow".into(),
        };
        assert!(bad_expiry.to_session().is_none());

        let blank = StoredSession {
            token: " ".into(),
            expires_at: Utc::now().to_rfc3339(),
        };
        assert!(blank.to_session().is_none());
    }

    #[test]
    fn test_memory_store_legacy_purge() {
        let store = MemorySessionStore::new().with_legacy_password("hunter2");
        assert!(store.has_legacy_password());
        store.purge_legacy().unwrap();
        assert!(!store.has_legacy_password());
    }
}

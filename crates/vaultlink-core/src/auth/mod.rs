//! Authentication module for the vault credential session.
//!
//! This module provides:
//! - `CredentialSession`: negotiates the session token (secure path with
//!   client-side sealing, plain fallback), tracks expiry, persists it
//! - `SessionState`: the shared, read-mostly view of the current session
//! - `SessionStore`: durable storage for the token across restarts
//!
//! Tokens default to a one-hour lifetime unless the backend says otherwise.

pub mod credential_session;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod session;
pub mod store;

pub use credential_session::{CredentialSession, SessionConfig, UnlockStrategy};
pub use credentials::LegacyKeychain;
pub use crypto::{AeadSealer, CipherSuite, PasswordSealer, SealedPassword};
pub use error::AuthError;
pub use session::{
    generate_session_id, Clock, ManualClock, Session, SessionPhase, SessionState, SystemClock,
    TokenIssuer,
};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoredSession};

use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Secure unlock unavailable: {0}")]
    CryptoUnavailable(String),

    #[error("Unlock rejected: {0}")]
    Rejected(String),

    #[error("Password required")]
    EmptyPassword,

    #[error("Unexpected unlock response: {0}")]
    Protocol(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl AuthError {
    /// The backend could not be reached, as opposed to a refused password.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, AuthError::Api(e) if e.is_connectivity())
    }
}

//! Authentication error types.

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::session::storage::StorageError;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error(transparent)]
    InvalidEmail(#[from] pricepulse_core::EmailError),

    /// Password too weak or invalid.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    /// Password and confirmation differ.
    #[error("passwords do not match")]
    PasswordMismatch,

    /// The backend rejected the credentials. Carries the server's reason.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The backend refused the request for a non-credential reason
    /// (for example, the email is already registered).
    #[error("{0}")]
    Rejected(String),

    /// The federated identity provider reported a failure or no code.
    #[error("federated login failed: {0}")]
    Federated(String),

    /// The active provider cannot handle these credentials.
    #[error("{provider} provider does not accept {credentials} credentials")]
    UnsupportedCredentials {
        /// Provider name.
        provider: &'static str,
        /// Credential kind that was offered.
        credentials: &'static str,
    },

    /// The active provider has no registration flow.
    #[error("{0} provider does not support registration")]
    RegistrationUnsupported(&'static str),

    /// Backend could not be reached or answered unexpectedly.
    #[error("backend error: {0}")]
    Gateway(GatewayError),

    /// Persisted session state could not be written.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<GatewayError> for AuthError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized(reason) => Self::InvalidCredentials(reason),
            GatewayError::InvalidIdentity(e) => Self::InvalidEmail(e),
            GatewayError::Api {
                status: 400..=499,
                reason: Some(reason),
            } => Self::Rejected(reason),
            other => Self::Gateway(other),
        }
    }
}

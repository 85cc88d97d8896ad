//! Unified error handling.
//!
//! Component errors convert into [`ClientError`] with `?`. Front ends show
//! [`ClientError::user_message`] rather than the `Display` text, which is
//! meant for logs.

use thiserror::Error;

use crate::alerts::AlertError;
use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::polling::PollingError;
use crate::products::ProductError;
use crate::session::{AuthError, OtpError, StorageError};
use crate::tracking::TrackingError;

/// Client-level error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Backend request failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Session storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Authentication failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// One-time code flow failed.
    #[error("Verification error: {0}")]
    Otp(#[from] OtpError),

    /// Tracking submission failed.
    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    /// Product operation failed.
    #[error("Product error: {0}")]
    Product(#[from] ProductError),

    /// Alert operation failed.
    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    /// Refresh timer could not start.
    #[error("Polling error: {0}")]
    Polling(#[from] PollingError),

    /// Bad input from the user.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ClientError {
    /// Text suitable for showing to the user.
    ///
    /// Validation and server-reported reasons pass through; transport and
    /// internal failures collapse to a generic message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(e) => e.to_string(),
            Self::Gateway(e) => gateway_message(e),
            Self::Storage(_) => "Could not access the saved session.".to_string(),
            Self::Auth(e) => match e {
                AuthError::Gateway(g) => gateway_message(g),
                AuthError::Storage(_) => "Could not update the saved session.".to_string(),
                AuthError::InvalidCredentials(reason) | AuthError::Rejected(reason) => reason.clone(),
                other => capitalize(&other.to_string()),
            },
            Self::Otp(e) => match e {
                OtpError::Auth(AuthError::Gateway(g)) => gateway_message(g),
                other => capitalize(&other.to_string()),
            },
            Self::Tracking(TrackingError::ListUnavailable(g)) => gateway_message(g),
            Self::Tracking(e) => capitalize(&e.to_string()),
            Self::Product(ProductError::Gateway(g)) | Self::Alert(AlertError::Gateway(g)) => {
                gateway_message(g)
            }
            Self::Product(e) => capitalize(&e.to_string()),
            Self::Alert(e) => capitalize(&e.to_string()),
            Self::Polling(e) => capitalize(&e.to_string()),
            Self::BadRequest(msg) => msg.clone(),
        }
    }

    /// Whether the user needs to sign in again.
    #[must_use]
    pub const fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::Gateway(GatewayError::Unauthorized(_))
                | Self::Tracking(TrackingError::NoSession | TrackingError::Unauthorized(_))
                | Self::Product(ProductError::NoSession | ProductError::Gateway(GatewayError::Unauthorized(_)))
                | Self::Alert(AlertError::NoSession | AlertError::Gateway(GatewayError::Unauthorized(_)))
                | Self::Polling(PollingError::NoSession)
        )
    }
}

fn gateway_message(err: &GatewayError) -> String {
    match err {
        GatewayError::Http(_) => "Network error. Please try again.".to_string(),
        GatewayError::Unauthorized(reason) | GatewayError::NotFound(reason) => reason.clone(),
        GatewayError::Api {
            reason: Some(reason),
            status,
        } if *status < 500 => reason.clone(),
        GatewayError::Api { .. } | GatewayError::Decode(_) | GatewayError::InvalidIdentity(_) => {
            "Something went wrong on the server. Please try again.".to_string()
        }
        GatewayError::Url(_) => "The backend address is misconfigured.".to_string(),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_reason_passes_through() {
        let err = ClientError::from(AuthError::InvalidCredentials("Invalid credentials".into()));
        assert_eq!(err.user_message(), "Invalid credentials");

        let err = ClientError::from(GatewayError::Api {
            status: 404,
            reason: Some("Product not found".into()),
        });
        assert_eq!(err.user_message(), "Product not found");
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = ClientError::from(GatewayError::Api {
            status: 500,
            reason: Some("Traceback (most recent call last)".into()),
        });
        assert_eq!(
            err.user_message(),
            "Something went wrong on the server. Please try again."
        );
    }

    #[test]
    fn test_validation_messages() {
        let err = ClientError::from(TrackingError::DuplicateTracking("https://a".into()));
        assert_eq!(err.user_message(), "This product is already being tracked");
        assert!(!err.requires_login());

        let err = ClientError::from(TrackingError::NoSession);
        assert!(err.requires_login());
    }

    #[test]
    fn test_storage_failure_message_fits_sign_in_and_sign_out() {
        let err = ClientError::from(AuthError::Storage(StorageError::Corrupt("bad json".into())));
        assert_eq!(err.user_message(), "Could not update the saved session.");
    }

    #[test]
    fn test_list_failure_before_tracking_uses_gateway_text() {
        let err = ClientError::from(TrackingError::ListUnavailable(GatewayError::Api {
            status: 503,
            reason: None,
        }));
        assert_eq!(
            err.user_message(),
            "Something went wrong on the server. Please try again."
        );
    }
}

//! Target-price alerts.
//!
//! Input is validated locally before any request. Submissions are never
//! retried, and identical alerts are not merged.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, instrument};

use pricepulse_core::{Alert, AlertId, AlertRequest, Email, EmailError, Price, PriceError, ProductId};

use crate::gateway::{AlertBackend, GatewayError};
use crate::session::SessionStore;

/// Errors from alert operations.
#[derive(Debug, Error)]
pub enum AlertError {
    /// No session is active.
    #[error("sign in to manage price alerts")]
    NoSession,

    /// The target price is not a positive amount.
    #[error("invalid target price: {0}")]
    InvalidPrice(#[from] PriceError),

    /// The notification email is malformed.
    #[error(transparent)]
    InvalidEmail(#[from] EmailError),

    /// Backend call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Validates and submits target-price alerts.
#[derive(Clone)]
pub struct AlertSubmitter {
    backend: Arc<dyn AlertBackend>,
    session: SessionStore,
}

impl AlertSubmitter {
    /// Create a submitter.
    #[must_use]
    pub fn new(backend: Arc<dyn AlertBackend>, session: SessionStore) -> Self {
        Self { backend, session }
    }

    /// Ask to be emailed when `product_id` drops to `target_price`.
    ///
    /// Returns the server's message verbatim.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidPrice` or `AlertError::InvalidEmail`
    /// before any request is made, or the gateway error.
    #[instrument(skip(self, email), fields(product_id = %product_id))]
    pub async fn submit(
        &self,
        product_id: &ProductId,
        target_price: Decimal,
        email: &str,
    ) -> Result<String, AlertError> {
        let target_price = Price::positive(target_price)?;
        let notify_email = Email::parse(email)?;
        if !self.session.is_active() {
            return Err(AlertError::NoSession);
        }

        let request = AlertRequest {
            product_id: product_id.clone(),
            target_price,
            notify_email,
            created_at: Utc::now(),
        };
        let message = self.backend.create_alert(&request).await?;
        info!(target_price = %request.target_price, "alert submitted");
        Ok(message)
    }

    /// The user's alerts.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NoSession` or the gateway error.
    pub async fn list(&self) -> Result<Vec<Alert>, AlertError> {
        if !self.session.is_active() {
            return Err(AlertError::NoSession);
        }
        Ok(self.backend.list_alerts().await?)
    }

    /// Delete an alert.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::NoSession` or the gateway error.
    #[instrument(skip(self), fields(alert_id = %id))]
    pub async fn delete(&self, id: &AlertId) -> Result<(), AlertError> {
        if !self.session.is_active() {
            return Err(AlertError::NoSession);
        }
        self.backend.delete_alert(id).await?;
        info!("alert deleted");
        Ok(())
    }
}

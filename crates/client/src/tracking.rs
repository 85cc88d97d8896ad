//! Tracking orchestrator.
//!
//! Registers new product URLs with the backend. The backend scrapes the page
//! synchronously on first registration, which is slow and sometimes flaky,
//! so registration is retried a bounded number of times at a fixed interval.
//! A URL already tracked (or being submitted) is rejected before any request.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use pricepulse_core::{Price, PriceHistory, PricePoint, ProductId, TrackedProduct};

use crate::config::SyncConfig;
use crate::gateway::{GatewayError, ProductBackend, TrackResponse};
use crate::products::ProductCollection;
use crate::session::SessionStore;

/// Reason recorded when a 2xx response carries no product identifier.
const MISSING_ID_REASON: &str = "response did not include a product identifier";

/// Errors from tracking submission.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// No session is active.
    #[error("sign in to track products")]
    NoSession,

    /// The URL is not an absolute http(s) URL.
    #[error("invalid product URL: {0}")]
    InvalidUrl(String),

    /// The URL is already tracked or being submitted.
    #[error("this product is already being tracked")]
    DuplicateTracking(String),

    /// Every attempt failed.
    #[error("could not track product after {attempts} attempts{}", reason_suffix(.last_reason.as_deref()))]
    TrackingFailed {
        /// Attempts made.
        attempts: u32,
        /// Last reason reported by the server, if any.
        last_reason: Option<String>,
    },

    /// The tracked list could not be fetched, so duplicates cannot be ruled out.
    #[error("could not load tracked products: {0}")]
    ListUnavailable(GatewayError),

    /// The backend rejected the session credential.
    #[error("session is no longer valid: {0}")]
    Unauthorized(String),

    /// Cancelled, or the session ended; any result was discarded.
    #[error("tracking submission was cancelled")]
    Cancelled,
}

fn reason_suffix(reason: Option<&str>) -> String {
    reason.map(|r| format!(": {r}")).unwrap_or_default()
}

/// Submits URLs for tracking and inserts the results into the collection.
#[derive(Clone)]
pub struct TrackingOrchestrator {
    backend: Arc<dyn ProductBackend>,
    collection: ProductCollection,
    session: SessionStore,
    max_attempts: u32,
    retry_delay: Duration,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Holds a URL in the in-flight set until dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    url: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.url);
    }
}

impl TrackingOrchestrator {
    /// Create an orchestrator with the retry policy from `sync`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn ProductBackend>,
        collection: ProductCollection,
        session: SessionStore,
        sync: &SyncConfig,
    ) -> Self {
        Self {
            backend,
            collection,
            session,
            max_attempts: sync.track_max_attempts.max(1),
            retry_delay: sync.track_retry_delay,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Submit `url` for tracking.
    ///
    /// # Errors
    ///
    /// See [`submit_with_cancel`](Self::submit_with_cancel).
    pub async fn submit(&self, url: &str) -> Result<TrackedProduct, TrackingError> {
        self.submit_with_cancel(url, &CancellationToken::new()).await
    }

    /// Submit `url` for tracking, stopping early if `cancel` fires.
    ///
    /// # Errors
    ///
    /// - `TrackingError::NoSession` without an active session
    /// - `TrackingError::InvalidUrl` for a malformed URL
    /// - `TrackingError::DuplicateTracking` if the URL is already tracked;
    ///   no request is made
    /// - `TrackingError::ListUnavailable` if the tracked list has not been
    ///   loaded this session and fetching it fails
    /// - `TrackingError::TrackingFailed` once every attempt has failed
    /// - `TrackingError::Unauthorized` if the backend rejects the credential
    /// - `TrackingError::Cancelled` if cancelled or the session ended
    #[instrument(skip(self, cancel))]
    pub async fn submit_with_cancel(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<TrackedProduct, TrackingError> {
        if !self.session.is_active() {
            return Err(TrackingError::NoSession);
        }
        let url = url.trim();
        validate_url(url)?;

        let epoch = self.collection.epoch();
        if !self.collection.is_loaded() {
            self.load_collection(epoch, cancel).await?;
        }
        let _in_flight = self.claim(url)?;

        let response = self.register_with_retry(url, epoch, cancel).await?;
        let Some(id) = response.id.clone() else {
            return Err(TrackingError::TrackingFailed {
                attempts: self.max_attempts,
                last_reason: Some(MISSING_ID_REASON.to_string()),
            });
        };

        let product = new_product(ProductId::new(id), url, response);
        if cancel.is_cancelled() || !self.collection.upsert_if_current(epoch, product.clone()) {
            warn!("discarding tracking result for an ended session");
            return Err(TrackingError::Cancelled);
        }

        info!(product_id = %product.id, "product tracked");
        Ok(product)
    }

    /// Reserve `url`, rejecting it if already tracked or in flight.
    fn claim(&self, url: &str) -> Result<InFlight, TrackingError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if self.collection.contains_url(url) || !in_flight.insert(url.to_string()) {
            return Err(TrackingError::DuplicateTracking(url.to_string()));
        }
        Ok(InFlight {
            set: Arc::clone(&self.in_flight),
            url: url.to_string(),
        })
    }

    /// Fetch the tracked list so the duplicate check sees what the server holds.
    async fn load_collection(&self, epoch: u64, cancel: &CancellationToken) -> Result<(), TrackingError> {
        let result = tokio::select! {
            () = cancel.cancelled() => return Err(TrackingError::Cancelled),
            result = self.backend.list_products() => result,
        };
        match result {
            Ok(products) => {
                if !self.collection.replace_if_current(epoch, products) {
                    return Err(TrackingError::Cancelled);
                }
                debug!(count = self.collection.len(), "loaded tracked products before submit");
                Ok(())
            }
            Err(GatewayError::Unauthorized(reason)) => Err(TrackingError::Unauthorized(reason)),
            Err(e) => Err(TrackingError::ListUnavailable(e)),
        }
    }

    async fn register_with_retry(
        &self,
        url: &str,
        epoch: u64,
        cancel: &CancellationToken,
    ) -> Result<TrackResponse, TrackingError> {
        let mut last_reason = None;

        for attempt in 1..=self.max_attempts {
            if self.collection.epoch() != epoch {
                return Err(TrackingError::Cancelled);
            }
            let result = tokio::select! {
                () = cancel.cancelled() => return Err(TrackingError::Cancelled),
                result = self.backend.track_product(url) => result,
            };

            match result {
                Ok(response) if response.id.as_deref().is_some_and(|id| !id.is_empty()) => {
                    return Ok(response);
                }
                Ok(response) => {
                    let reason = response.error.unwrap_or_else(|| MISSING_ID_REASON.to_string());
                    warn!(attempt, reason = %reason, "tracking response without product id");
                    last_reason = Some(reason);
                }
                Err(GatewayError::Unauthorized(reason)) => {
                    return Err(TrackingError::Unauthorized(reason));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "tracking attempt failed");
                    if let Some(reason) = e.server_reason() {
                        last_reason = Some(reason.to_string());
                    }
                }
            }

            if attempt < self.max_attempts {
                tokio::select! {
                    () = cancel.cancelled() => return Err(TrackingError::Cancelled),
                    () = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }

        Err(TrackingError::TrackingFailed {
            attempts: self.max_attempts,
            last_reason,
        })
    }
}

fn validate_url(url: &str) -> Result<(), TrackingError> {
    let parsed = Url::parse(url).map_err(|e| TrackingError::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(TrackingError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    Ok(())
}

/// Local view of a freshly registered product until the next refresh.
fn new_product(id: ProductId, url: &str, response: TrackResponse) -> TrackedProduct {
    let now = Utc::now();
    let current_price = response.current_price.unwrap_or(Price::ZERO);
    let price_history = if current_price.is_positive() {
        PriceHistory::from_points(vec![PricePoint::new(current_price, now)])
    } else {
        PriceHistory::default()
    };

    TrackedProduct {
        id,
        source_url: url.to_string(),
        display_name: response
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| url.to_string()),
        image_url: response.image_url.filter(|i| !i.is_empty() && i != "undefined"),
        current_price,
        price_history,
        tracking_enabled: true,
        updated_at: now,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com/p/1").is_ok());
        assert!(matches!(validate_url("example.com/p/1"), Err(TrackingError::InvalidUrl(_))));
        assert!(matches!(validate_url("ftp://example.com"), Err(TrackingError::InvalidUrl(_))));
    }

    #[test]
    fn test_new_product_from_minimal_response() {
        let response = TrackResponse {
            id: Some("p1".into()),
            name: Some("Widget".into()),
            ..TrackResponse::default()
        };
        let product = new_product(ProductId::new("p1"), "https://example.com/p/1", response);
        assert_eq!(product.display_name, "Widget");
        assert!(product.tracking_enabled);
        assert!(product.price_history.is_empty());
    }

    #[test]
    fn test_failure_message_includes_reason() {
        let err = TrackingError::TrackingFailed {
            attempts: 20,
            last_reason: Some("Could not scrape product data".into()),
        };
        assert_eq!(
            err.to_string(),
            "could not track product after 20 attempts: Could not scrape product data"
        );
    }
}

//! Wire types for the PricePulse REST API and their conversions to core types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pricepulse_core::{
    Alert, AlertId, Email, Identity, Price, PriceHistory, PricePoint, ProductId, TrackedProduct, UserId,
};

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(super) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(super) struct RegisterRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(super) struct SendCodeRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Serialize)]
pub(super) struct VerifyCodeRequest<'a> {
    pub email: &'a str,
    pub otp: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(super) struct FederatedCallbackRequest<'a> {
    pub code: &'a str,
}

/// Token + user body returned by login, register and federated callback.
#[derive(Debug, Deserialize)]
pub(super) struct AuthResponse {
    pub access_token: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub(super) struct UserResponse {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Body of a successful code verification.
///
/// Some backends create the account during verification and return a token;
/// others only acknowledge the code.
#[derive(Debug, Default, Deserialize)]
pub(super) struct VerifyCodeResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserResponse>,
}

/// A credential plus identity as returned by an auth endpoint.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    /// Opaque bearer token.
    pub access_token: secrecy::SecretString,
    /// Authenticated user.
    pub identity: Identity,
}

impl UserResponse {
    pub(super) fn into_identity(self) -> Result<Identity, pricepulse_core::EmailError> {
        Ok(Identity {
            id: UserId::new(self.id),
            email: Email::parse(&self.email)?,
            name: self.name,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Products
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(super) struct TrackRequest<'a> {
    pub url: &'a str,
}

#[derive(Debug, Serialize)]
pub(super) struct TrackingToggleRequest {
    pub tracking: bool,
}

/// Response to a tracking registration.
///
/// Every field is optional because a flaky scrape can produce a 2xx body
/// without an identifier; callers treat a missing `id` as a failed attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TrackResponse {
    /// New product ID (`product_id` on some backends).
    #[serde(default, alias = "product_id")]
    pub id: Option<String>,
    /// Scraped product title.
    #[serde(default)]
    pub name: Option<String>,
    /// Scraped image URL.
    #[serde(default, alias = "image")]
    pub image_url: Option<String>,
    /// Scraped price.
    #[serde(default, alias = "currentPrice", alias = "price")]
    pub current_price: Option<Price>,
    /// Failure reason reported in a 2xx body.
    #[serde(default, alias = "detail")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ProductListResponse {
    #[serde(default)]
    pub products: Vec<ProductResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProductResponse {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub current_price: Option<Price>,
    #[serde(default)]
    pub price_history: Vec<PricePointResponse>,
    /// Absent means tracking was never paused.
    #[serde(default)]
    pub tracking: Option<bool>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PricePointResponse {
    pub price: Price,
    pub timestamp: DateTime<Utc>,
}

impl ProductResponse {
    pub(super) fn into_product(self) -> TrackedProduct {
        let price_history = PriceHistory::from_points(
            self.price_history
                .into_iter()
                .map(|p| PricePoint::new(p.price, p.timestamp))
                .collect(),
        );
        let current_price = self
            .current_price
            .or_else(|| price_history.latest().map(|p| p.price))
            .unwrap_or_default();
        let updated_at = self
            .updated_at
            .or_else(|| price_history.latest().map(|p| p.timestamp))
            .unwrap_or_else(Utc::now);

        TrackedProduct {
            id: ProductId::new(self.id),
            source_url: self.url,
            display_name: self.name,
            image_url: self.image.filter(|i| !i.is_empty() && i != "undefined"),
            current_price,
            price_history,
            tracking_enabled: self.tracking.unwrap_or(true),
            updated_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Alerts
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(super) struct CreateAlertRequest<'a> {
    pub product_id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    pub target_price: Decimal,
    pub email: &'a str,
}

/// `{ "message": ... }` body returned by mutating endpoints.
#[derive(Debug, Default, Deserialize)]
pub(super) struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct AlertListResponse {
    #[serde(default)]
    pub alerts: Vec<AlertResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AlertResponse {
    pub id: String,
    pub product_id: String,
    pub target_price: Price,
    pub email: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub product: Option<AlertProductResponse>,
}

#[derive(Debug, Deserialize)]
pub(super) struct AlertProductResponse {
    #[serde(default)]
    pub name: Option<String>,
}

impl AlertResponse {
    pub(super) fn into_alert(self) -> Result<Alert, pricepulse_core::EmailError> {
        Ok(Alert {
            id: AlertId::new(self.id),
            product_id: ProductId::new(self.product_id),
            product_name: self.product.and_then(|p| p.name),
            target_price: self.target_price,
            email: Email::parse(&self.email)?,
            created_at: self.created_at,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// FastAPI-style error body.
#[derive(Debug, Default, Deserialize)]
pub(super) struct ErrorResponse {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorResponse {
    /// Human-readable reason, preferring `detail`.
    pub(super) fn reason(self) -> Option<String> {
        let detail = self.detail.and_then(|d| match d {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            // Validation errors arrive as a list of objects with a `msg` field.
            serde_json::Value::Array(items) => {
                let msgs: Vec<String> = items
                    .iter()
                    .filter_map(|i| i.get("msg").and_then(serde_json::Value::as_str))
                    .map(str::to_owned)
                    .collect();
                (!msgs.is_empty()).then(|| msgs.join("; "))
            }
            other => Some(other.to_string()),
        });
        detail.or(self.error).or(self.message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_track_response_accepts_either_id_field() {
        let r: TrackResponse = serde_json::from_str(r#"{"product_id":"p1","name":"Widget"}"#).unwrap();
        assert_eq!(r.id.as_deref(), Some("p1"));

        let r: TrackResponse = serde_json::from_str(r#"{"id":"p2","name":"Gadget"}"#).unwrap();
        assert_eq!(r.id.as_deref(), Some("p2"));

        let r: TrackResponse = serde_json::from_str(r#"{"error":"Could not scrape"}"#).unwrap();
        assert!(r.id.is_none());
        assert_eq!(r.error.as_deref(), Some("Could not scrape"));
    }

    #[test]
    fn test_product_response_conversion() {
        let json = r#"{
            "id": "p1",
            "url": "https://example.com/p/1",
            "name": "Widget",
            "image": "undefined",
            "currentPrice": 120.5,
            "priceHistory": [
                {"price": 130, "timestamp": "2026-03-02T00:00:00Z"},
                {"price": 140, "timestamp": "2026-03-01T00:00:00Z"}
            ],
            "updatedAt": "2026-03-02T00:00:00Z"
        }"#;
        let product = serde_json::from_str::<ProductResponse>(json).unwrap().into_product();

        assert_eq!(product.id.as_str(), "p1");
        assert!(product.image_url.is_none());
        assert!(product.tracking_enabled);
        assert_eq!(product.current_price.amount(), Decimal::new(1205, 1));
        assert_eq!(product.price_history.first().unwrap().price.amount(), Decimal::new(140, 0));
    }

    #[test]
    fn test_product_without_price_uses_latest_point() {
        let json = r#"{
            "id": "p1",
            "priceHistory": [{"price": 99, "timestamp": "2026-03-01T00:00:00Z"}],
            "tracking": false
        }"#;
        let product = serde_json::from_str::<ProductResponse>(json).unwrap().into_product();
        assert_eq!(product.current_price.amount(), Decimal::new(99, 0));
        assert!(!product.tracking_enabled);
    }

    #[test]
    fn test_error_reason_variants() {
        let e: ErrorResponse = serde_json::from_str(r#"{"detail":"Invalid credentials"}"#).unwrap();
        assert_eq!(e.reason().as_deref(), Some("Invalid credentials"));

        let e: ErrorResponse =
            serde_json::from_str(r#"{"detail":[{"msg":"field required"},{"msg":"bad email"}]}"#).unwrap();
        assert_eq!(e.reason().as_deref(), Some("field required; bad email"));

        let e: ErrorResponse = serde_json::from_str(r#"{"error":"boom"}"#).unwrap();
        assert_eq!(e.reason().as_deref(), Some("boom"));

        assert!(ErrorResponse::default().reason().is_none());
    }

    #[test]
    fn test_alert_request_sends_float() {
        let body = CreateAlertRequest {
            product_id: "p1",
            target_price: Decimal::new(1999, 2),
            email: "a@b.co",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["target_price"], serde_json::json!(19.99));
    }
}

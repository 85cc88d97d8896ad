//! Backend gateway for the PricePulse REST API.
//!
//! [`ApiClient`] is the only place that knows the API base address and the
//! only place that attaches the session credential to outgoing requests.
//! It never retries; retry policy belongs to callers.
//!
//! The endpoint families are exposed as traits ([`AuthBackend`],
//! [`ProductBackend`], [`AlertBackend`]) so the session store and the sync
//! components can be exercised against in-process stubs.
//!
//! # Example
//!
//! ```rust,ignore
//! use pricepulse_client::{ClientConfig, gateway::ApiClient};
//!
//! let client = ApiClient::new(&ClientConfig::from_env()?)?;
//! let grant = client.login(&email, &password).await?;
//! client.set_credential(Some(grant.access_token));
//! let products = client.list_products().await?;
//! ```

mod types;

pub use types::{AuthGrant, TrackResponse};

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use pricepulse_core::{Alert, AlertId, AlertRequest, Email, EmailError, ProductId, TrackedProduct};

use crate::config::ClientConfig;
use types::{
    AlertListResponse, AuthResponse, CreateAlertRequest, ErrorResponse, FederatedCallbackRequest,
    LoginRequest, MessageResponse, ProductListResponse, ProductResponse, RegisterRequest,
    SendCodeRequest, TrackRequest, TrackingToggleRequest, VerifyCodeRequest, VerifyCodeResponse,
};

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never produced an HTTP response (connect, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend rejected the credentials or session token.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend answered with a non-success status.
    #[error("API error: {status}{}", format_reason(.reason.as_deref()))]
    Api {
        /// HTTP status code.
        status: u16,
        /// Reason reported in the error body, if any.
        reason: Option<String>,
    },

    /// The response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// The backend returned an identity with a malformed email.
    #[error("Invalid identity in response: {0}")]
    InvalidIdentity(#[from] EmailError),

    /// An endpoint URL could not be built.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

fn format_reason(reason: Option<&str>) -> String {
    reason.map(|r| format!(" - {r}")).unwrap_or_default()
}

impl GatewayError {
    /// Reason reported by the server, if the failure came with one.
    #[must_use]
    pub fn server_reason(&self) -> Option<&str> {
        match self {
            Self::Unauthorized(reason) | Self::NotFound(reason) => Some(reason),
            Self::Api { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint families
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication endpoints.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange email and password for a token.
    async fn login(&self, email: &Email, password: &SecretString) -> Result<AuthGrant, GatewayError>;

    /// Create an account and return its token.
    async fn register(
        &self,
        email: &Email,
        password: &SecretString,
        name: Option<&str>,
    ) -> Result<AuthGrant, GatewayError>;

    /// Ask the backend to email a one-time code. Returns the server message.
    async fn send_code(&self, email: &Email) -> Result<String, GatewayError>;

    /// Check a one-time code.
    ///
    /// Returns a grant when the backend creates the account as part of
    /// verification, `None` when it only acknowledges the code.
    async fn verify_code(
        &self,
        email: &Email,
        code: &str,
        password: Option<&SecretString>,
        name: Option<&str>,
    ) -> Result<Option<AuthGrant>, GatewayError>;

    /// Exchange a federated authorization code for a token.
    async fn federated_callback(&self, code: &str) -> Result<AuthGrant, GatewayError>;
}

/// Tracked product endpoints.
#[async_trait]
pub trait ProductBackend: Send + Sync {
    /// Fetch the user's tracked products.
    async fn list_products(&self) -> Result<Vec<TrackedProduct>, GatewayError>;

    /// Fetch one product with its full price history.
    async fn get_product(&self, id: &ProductId) -> Result<TrackedProduct, GatewayError>;

    /// Register a URL for tracking. The backend scrapes synchronously.
    async fn track_product(&self, url: &str) -> Result<TrackResponse, GatewayError>;

    /// Stop tracking and delete a product.
    async fn delete_product(&self, id: &ProductId) -> Result<(), GatewayError>;

    /// Pause or resume tracking for a product.
    async fn set_tracking(&self, id: &ProductId, enabled: bool) -> Result<(), GatewayError>;
}

/// Target-price alert endpoints.
#[async_trait]
pub trait AlertBackend: Send + Sync {
    /// Create an alert. Returns the server's message verbatim.
    async fn create_alert(&self, request: &AlertRequest) -> Result<String, GatewayError>;

    /// Fetch the user's alerts.
    async fn list_alerts(&self) -> Result<Vec<Alert>, GatewayError>;

    /// Delete an alert.
    async fn delete_alert(&self, id: &AlertId) -> Result<(), GatewayError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP client
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the PricePulse REST API.
///
/// Cheap to clone; clones share the HTTP connection pool and the credential.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_url: Url,
    /// Bearer credential of the active session
    credential: RwLock<Option<SecretString>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("has_credential", &self.has_credential())
            .finish()
    }
}

impl ApiClient {
    /// Create a new API client for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &ClientConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("pricepulse/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_url: config.api_base_url.clone(),
                credential: RwLock::new(None),
            }),
        })
    }

    /// The backend base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Replace the credential attached to subsequent requests.
    pub fn set_credential(&self, credential: Option<SecretString>) {
        *self
            .inner
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credential;
    }

    /// Whether a credential is currently attached.
    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.inner
            .credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, GatewayError> {
        let url = self.inner.base_url.join(path)?;
        let builder = self.inner.client.request(method, url);

        let credential = self
            .inner
            .credential
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(match credential.as_ref() {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        })
    }

    /// Send a request and decode a JSON body.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let bytes = self.send_raw(request).await?;
        serde_json::from_slice(&bytes).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// Send a request answered with an optional human-readable message.
    async fn send_message(&self, request: RequestBuilder) -> Result<Option<String>, GatewayError> {
        let bytes = self.send_raw(request).await?;
        Ok(message_from_body(&bytes))
    }

    /// Send a request whose body may be empty or missing fields.
    async fn send_lenient<T: DeserializeOwned + Default>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, GatewayError> {
        let bytes = self.send_raw(request).await?;
        if bytes.is_empty() {
            return Ok(T::default());
        }
        Ok(serde_json::from_slice(&bytes).unwrap_or_default())
    }

    async fn send_raw(&self, request: RequestBuilder) -> Result<Vec<u8>, GatewayError> {
        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "backend response");

        if status.is_success() {
            return Ok(response.bytes().await?.to_vec());
        }

        let body = response.bytes().await.unwrap_or_default();
        let reason = serde_json::from_slice::<ErrorResponse>(&body)
            .ok()
            .and_then(ErrorResponse::reason)
            .or_else(|| {
                let text = String::from_utf8_lossy(&body).trim().to_string();
                (!text.is_empty()).then_some(text)
            });

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                GatewayError::Unauthorized(reason.unwrap_or_else(|| "Invalid credentials".to_string()))
            }
            StatusCode::NOT_FOUND => {
                GatewayError::NotFound(reason.unwrap_or_else(|| "Resource not found".to_string()))
            }
            _ => GatewayError::Api {
                status: status.as_u16(),
                reason,
            },
        })
    }

    async fn grant(&self, request: RequestBuilder) -> Result<AuthGrant, GatewayError> {
        let response: AuthResponse = self.send(request).await?;
        Ok(AuthGrant {
            access_token: SecretString::from(response.access_token),
            identity: response.user.into_identity()?,
        })
    }
}

#[async_trait]
impl AuthBackend for ApiClient {
    #[instrument(skip(self, password), fields(email = %email))]
    async fn login(&self, email: &Email, password: &SecretString) -> Result<AuthGrant, GatewayError> {
        let request = self.request(Method::POST, "api/auth/login")?.json(&LoginRequest {
            email: email.as_str(),
            password: password.expose_secret(),
        });
        self.grant(request).await
    }

    #[instrument(skip(self, password, name), fields(email = %email))]
    async fn register(
        &self,
        email: &Email,
        password: &SecretString,
        name: Option<&str>,
    ) -> Result<AuthGrant, GatewayError> {
        let request = self.request(Method::POST, "api/auth/register")?.json(&RegisterRequest {
            email: email.as_str(),
            password: password.expose_secret(),
            name,
        });
        self.grant(request).await
    }

    #[instrument(skip(self), fields(email = %email))]
    async fn send_code(&self, email: &Email) -> Result<String, GatewayError> {
        let request = self
            .request(Method::POST, "api/auth/send-otp")?
            .json(&SendCodeRequest {
                email: email.as_str(),
            });
        let message = self.send_message(request).await?;
        Ok(message.unwrap_or_else(|| "Verification code sent".to_string()))
    }

    #[instrument(skip(self, code, password, name), fields(email = %email))]
    async fn verify_code(
        &self,
        email: &Email,
        code: &str,
        password: Option<&SecretString>,
        name: Option<&str>,
    ) -> Result<Option<AuthGrant>, GatewayError> {
        let request = self
            .request(Method::POST, "api/auth/verify-otp")?
            .json(&VerifyCodeRequest {
                email: email.as_str(),
                otp: code,
                password: password.map(ExposeSecret::expose_secret),
                name,
            });
        let response: VerifyCodeResponse = self.send_lenient(request).await?;

        match (response.access_token, response.user) {
            (Some(token), Some(user)) => Ok(Some(AuthGrant {
                access_token: SecretString::from(token),
                identity: user.into_identity()?,
            })),
            _ => Ok(None),
        }
    }

    #[instrument(skip(self, code))]
    async fn federated_callback(&self, code: &str) -> Result<AuthGrant, GatewayError> {
        let request = self
            .request(Method::POST, "api/auth/google/callback")?
            .json(&FederatedCallbackRequest { code });
        self.grant(request).await
    }
}

#[async_trait]
impl ProductBackend for ApiClient {
    #[instrument(skip(self))]
    async fn list_products(&self) -> Result<Vec<TrackedProduct>, GatewayError> {
        let response: ProductListResponse = self.send(self.request(Method::GET, "api/products")?).await?;
        Ok(response
            .products
            .into_iter()
            .map(ProductResponse::into_product)
            .collect())
    }

    #[instrument(skip(self), fields(product_id = %id))]
    async fn get_product(&self, id: &ProductId) -> Result<TrackedProduct, GatewayError> {
        let path = format!("api/products/{}", encode_segment(id.as_str()));
        let response: ProductResponse = self.send(self.request(Method::GET, &path)?).await?;
        Ok(response.into_product())
    }

    #[instrument(skip(self))]
    async fn track_product(&self, url: &str) -> Result<TrackResponse, GatewayError> {
        let request = self
            .request(Method::POST, "api/products/track")?
            .json(&TrackRequest { url });
        self.send(request).await
    }

    #[instrument(skip(self), fields(product_id = %id))]
    async fn delete_product(&self, id: &ProductId) -> Result<(), GatewayError> {
        let path = format!("api/products/{}", encode_segment(id.as_str()));
        self.send_raw(self.request(Method::DELETE, &path)?).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %id))]
    async fn set_tracking(&self, id: &ProductId, enabled: bool) -> Result<(), GatewayError> {
        let path = format!("api/products/{}/tracking", encode_segment(id.as_str()));
        let request = self
            .request(Method::PATCH, &path)?
            .json(&TrackingToggleRequest { tracking: enabled });
        self.send_raw(request).await?;
        Ok(())
    }
}

#[async_trait]
impl AlertBackend for ApiClient {
    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    async fn create_alert(&self, request: &AlertRequest) -> Result<String, GatewayError> {
        let body = CreateAlertRequest {
            product_id: request.product_id.as_str(),
            target_price: request.target_price.amount(),
            email: request.notify_email.as_str(),
        };
        let message = self
            .send_message(self.request(Method::POST, "api/alerts")?.json(&body))
            .await?;
        Ok(message.unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn list_alerts(&self) -> Result<Vec<Alert>, GatewayError> {
        let response: AlertListResponse = self.send(self.request(Method::GET, "api/alerts")?).await?;
        response
            .alerts
            .into_iter()
            .map(|a| a.into_alert().map_err(GatewayError::from))
            .collect()
    }

    #[instrument(skip(self), fields(alert_id = %id))]
    async fn delete_alert(&self, id: &AlertId) -> Result<(), GatewayError> {
        let path = format!("api/alerts/{}", encode_segment(id.as_str()));
        self.send_raw(self.request(Method::DELETE, &path)?).await?;
        Ok(())
    }
}

/// The `message` of a JSON body, or the body text when it is not JSON.
fn message_from_body(body: &[u8]) -> Option<String> {
    if let Ok(response) = serde_json::from_slice::<MessageResponse>(body) {
        return response.message;
    }
    if let Ok(text) = serde_json::from_slice::<String>(body) {
        return Some(text);
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Percent-encode an ID for use as a single path segment.
fn encode_segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::parse_base_url;

    fn client() -> ApiClient {
        ApiClient::new(&ClientConfig::new(parse_base_url("http://localhost:8000").unwrap())).unwrap()
    }

    #[test]
    fn test_gateway_error_display() {
        let err = GatewayError::Api {
            status: 400,
            reason: Some("Could not scrape product data".to_string()),
        };
        assert_eq!(err.to_string(), "API error: 400 - Could not scrape product data");

        let err = GatewayError::Api {
            status: 502,
            reason: None,
        };
        assert_eq!(err.to_string(), "API error: 502");
    }

    #[test]
    fn test_message_from_body() {
        assert_eq!(
            message_from_body(br#"{"message": "Price alert created successfully"}"#).as_deref(),
            Some("Price alert created successfully")
        );
        assert_eq!(message_from_body(br#""Alert saved""#).as_deref(), Some("Alert saved"));
        assert_eq!(message_from_body(b"  Alert saved\n").as_deref(), Some("Alert saved"));
        assert_eq!(message_from_body(br#"{"id": "a1"}"#), None);
        assert_eq!(message_from_body(b""), None);
    }

    #[test]
    fn test_server_reason() {
        let err = GatewayError::Unauthorized("Invalid credentials".to_string());
        assert_eq!(err.server_reason(), Some("Invalid credentials"));
        assert_eq!(GatewayError::Decode("x".into()).server_reason(), None);
    }

    #[test]
    fn test_credential_attached_as_bearer() {
        let client = client();
        let request = client.request(Method::GET, "api/products").unwrap().build().unwrap();
        assert!(request.headers().get("authorization").is_none());

        client.set_credential(Some(SecretString::from("tok-123")));
        let request = client.request(Method::GET, "api/products").unwrap().build().unwrap();
        assert_eq!(request.headers().get("authorization").unwrap(), "Bearer tok-123");
        assert_eq!(request.url().as_str(), "http://localhost:8000/api/products");

        client.set_credential(None);
        assert!(!client.has_credential());
    }

    #[test]
    fn test_debug_hides_credential() {
        let client = client();
        client.set_credential(Some(SecretString::from("super-secret-token")));
        let debug = format!("{client:?}");
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("has_credential: true"));
    }

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("abc123"), "abc123");
        assert_eq!(encode_segment("a/b c"), "a%2Fb%20c");
    }
}

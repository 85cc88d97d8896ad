//! Integration tests for the PricePulse client.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p pricepulse-integration-tests
//! ```
//!
//! The tests drive a [`PricePulse`] client against [`StubBackend`], an
//! in-process implementation of every backend trait. No server is needed.
//! Timer-based behavior (tracking retries, refresh timers, code expiry) is
//! tested under paused tokio time.
//!
//! # Test Categories
//!
//! - `session` - Restore, login, logout and event ordering
//! - `registration` - One-time code registration flow
//! - `tracking` - Deduplication, retries and cancellation
//! - `sync` - Refresh timers and alerts

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;

use pricepulse_client::gateway::{AlertBackend, AuthBackend, AuthGrant, GatewayError, ProductBackend, TrackResponse};
use pricepulse_client::session::{MemoryStorage, TOKEN_KEY, USER_KEY};
use pricepulse_client::{Backends, ClientConfig, PricePulse, SyncConfig};
use pricepulse_core::{
    Alert, AlertId, AlertRequest, Email, Identity, Price, PriceHistory, PricePoint, ProductId, TrackedProduct,
    UserId,
};

/// Password the stub accepts for every account.
pub const PASSWORD: &str = "correct-horse";

/// One-time code the stub accepts.
pub const VALID_CODE: &str = "424242";

/// What the stub does with the next tracking request.
#[derive(Debug, Clone)]
pub enum TrackOutcome {
    /// Register the URL and return a product ID.
    Accept,
    /// 2xx body without a product ID.
    MissingId,
    /// Non-success status with a reason.
    Fail(u16, &'static str),
    /// Credential rejected.
    Unauthorized,
}

#[derive(Default)]
struct State {
    products: Vec<TrackedProduct>,
    track_script: VecDeque<TrackOutcome>,
    track_calls: Vec<Instant>,
    alerts: Vec<AlertRequest>,
    next_id: usize,
}

/// In-process backend implementing auth, product and alert endpoints.
///
/// Tracking requests follow a script (see [`StubBackend::script_tracking`]);
/// once the script runs out every request is accepted.
#[derive(Default)]
pub struct StubBackend {
    state: Mutex<State>,
    track_delay: Mutex<Duration>,
    list_delay: Mutex<Duration>,
    list_failure: Mutex<Option<u16>>,
    grant_on_verify: bool,
    /// Number of `login` calls.
    pub login_calls: AtomicUsize,
    /// Number of `send_code` calls.
    pub send_code_calls: AtomicUsize,
    /// Number of `verify_code` calls.
    pub verify_calls: AtomicUsize,
    /// Number of `register` calls.
    pub register_calls: AtomicUsize,
    /// Number of `list_products` calls.
    pub list_calls: AtomicUsize,
    /// Number of `get_product` calls.
    pub get_calls: AtomicUsize,
    /// Number of `create_alert` calls.
    pub alert_calls: AtomicUsize,
}

impl StubBackend {
    /// Stub whose code verification only acknowledges the code.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stub that creates the account during code verification.
    #[must_use]
    pub fn granting_on_verify() -> Arc<Self> {
        Arc::new(Self {
            grant_on_verify: true,
            ..Self::default()
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue outcomes for the next tracking requests.
    pub fn script_tracking(&self, outcomes: impl IntoIterator<Item = TrackOutcome>) {
        self.state().track_script.extend(outcomes);
    }

    /// Make every tracking request take `delay` before answering.
    pub fn set_track_delay(&self, delay: Duration) {
        *self.track_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Make every list request take `delay` before answering.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Answer list requests with `status`, or normally again with `None`.
    pub fn fail_list(&self, status: Option<u16>) {
        *self.list_failure.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Seed the server-side product list.
    pub fn seed_products(&self, products: impl IntoIterator<Item = TrackedProduct>) {
        self.state().products.extend(products);
    }

    /// Instants at which tracking requests arrived.
    #[must_use]
    pub fn track_calls(&self) -> Vec<Instant> {
        self.state().track_calls.clone()
    }

    /// Alert requests received.
    #[must_use]
    pub fn alerts_received(&self) -> Vec<AlertRequest> {
        self.state().alerts.clone()
    }

    /// Number of `list_products` calls.
    #[must_use]
    pub fn list_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_product` calls.
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn grant(email: &Email, name: Option<&str>) -> AuthGrant {
        AuthGrant {
            access_token: SecretString::from(format!("token-for-{}", email.local_part())),
            identity: Identity {
                id: UserId::new(format!("user-{}", email.local_part())),
                email: email.clone(),
                name: name.map(str::to_string),
            },
        }
    }
}

#[async_trait]
impl AuthBackend for StubBackend {
    async fn login(&self, email: &Email, password: &SecretString) -> Result<AuthGrant, GatewayError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if password.expose_secret() == PASSWORD {
            Ok(Self::grant(email, Some("Test User")))
        } else {
            Err(GatewayError::Unauthorized("Invalid email or password".to_string()))
        }
    }

    async fn register(
        &self,
        email: &Email,
        _password: &SecretString,
        name: Option<&str>,
    ) -> Result<AuthGrant, GatewayError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::grant(email, name))
    }

    async fn send_code(&self, email: &Email) -> Result<String, GatewayError> {
        self.send_code_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Verification code sent to {email}"))
    }

    async fn verify_code(
        &self,
        email: &Email,
        code: &str,
        _password: Option<&SecretString>,
        name: Option<&str>,
    ) -> Result<Option<AuthGrant>, GatewayError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if code != VALID_CODE {
            return Err(GatewayError::Api {
                status: 400,
                reason: Some("Invalid verification code".to_string()),
            });
        }
        Ok(self.grant_on_verify.then(|| Self::grant(email, name)))
    }

    async fn federated_callback(&self, code: &str) -> Result<AuthGrant, GatewayError> {
        let email = Email::parse(&format!("{code}@federated.test"))?;
        Ok(Self::grant(&email, None))
    }
}

#[async_trait]
impl ProductBackend for StubBackend {
    async fn list_products(&self) -> Result<Vec<TrackedProduct>, GatewayError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(status) = *self.list_failure.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(GatewayError::Api { status, reason: None });
        }
        Ok(self.state().products.clone())
    }

    async fn get_product(&self, id: &ProductId) -> Result<TrackedProduct, GatewayError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.state()
            .products
            .iter()
            .find(|p| &p.id == id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound("Product not found".to_string()))
    }

    async fn track_product(&self, url: &str) -> Result<TrackResponse, GatewayError> {
        let delay = *self.track_delay.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = {
            let mut state = self.state();
            state.track_calls.push(Instant::now());
            state.track_script.pop_front().unwrap_or(TrackOutcome::Accept)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            TrackOutcome::Accept => {
                let mut state = self.state();
                state.next_id += 1;
                let product = product(&format!("p{}", state.next_id), url, 100);
                let response = TrackResponse {
                    id: Some(product.id.to_string()),
                    name: Some(product.display_name.clone()),
                    image_url: None,
                    current_price: Some(product.current_price),
                    error: None,
                };
                state.products.push(product);
                Ok(response)
            }
            TrackOutcome::MissingId => Ok(TrackResponse {
                error: Some("Could not read the product page".to_string()),
                ..TrackResponse::default()
            }),
            TrackOutcome::Fail(status, reason) => Err(GatewayError::Api {
                status,
                reason: Some(reason.to_string()),
            }),
            TrackOutcome::Unauthorized => Err(GatewayError::Unauthorized("Token expired".to_string())),
        }
    }

    async fn delete_product(&self, id: &ProductId) -> Result<(), GatewayError> {
        let mut state = self.state();
        let before = state.products.len();
        state.products.retain(|p| &p.id != id);
        if state.products.len() == before {
            return Err(GatewayError::NotFound("Product not found".to_string()));
        }
        Ok(())
    }

    async fn set_tracking(&self, id: &ProductId, enabled: bool) -> Result<(), GatewayError> {
        let mut state = self.state();
        let product = state
            .products
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| GatewayError::NotFound("Product not found".to_string()))?;
        product.tracking_enabled = enabled;
        Ok(())
    }
}

#[async_trait]
impl AlertBackend for StubBackend {
    async fn create_alert(&self, request: &AlertRequest) -> Result<String, GatewayError> {
        self.alert_calls.fetch_add(1, Ordering::SeqCst);
        self.state().alerts.push(request.clone());
        Ok("Price alert created successfully".to_string())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>, GatewayError> {
        Ok(self
            .state()
            .alerts
            .iter()
            .enumerate()
            .map(|(i, request)| Alert {
                id: AlertId::new(format!("a{}", i + 1)),
                product_id: request.product_id.clone(),
                product_name: None,
                target_price: request.target_price,
                email: request.notify_email.clone(),
                created_at: Some(request.created_at),
            })
            .collect())
    }

    async fn delete_alert(&self, id: &AlertId) -> Result<(), GatewayError> {
        let index = id
            .as_str()
            .strip_prefix('a')
            .and_then(|n| n.parse::<usize>().ok())
            .and_then(|n| n.checked_sub(1));
        let mut state = self.state();
        match index {
            Some(i) if i < state.alerts.len() => {
                state.alerts.remove(i);
                Ok(())
            }
            _ => Err(GatewayError::NotFound("Alert not found".to_string())),
        }
    }
}

/// A product with a single observation at `price`.
#[must_use]
pub fn product(id: &str, url: &str, price: i64) -> TrackedProduct {
    let price = Price::new(Decimal::new(price, 0));
    let now = Utc::now();
    TrackedProduct {
        id: ProductId::new(id),
        source_url: url.to_string(),
        display_name: format!("Product {id}"),
        image_url: None,
        current_price: price,
        price_history: PriceHistory::from_points(vec![PricePoint::new(price, now)]),
        tracking_enabled: true,
        updated_at: now,
    }
}

/// Everything a test needs: the client, its stub backend and its storage.
pub struct Harness {
    /// Client under test.
    pub client: PricePulse,
    /// Backend behind every endpoint family.
    pub backend: Arc<StubBackend>,
    /// Session storage.
    pub storage: Arc<MemoryStorage>,
}

impl Harness {
    /// Client with default settings over a fresh stub and empty storage.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn new() -> Self {
        Self::with(StubBackend::new(), Arc::new(MemoryStorage::new()))
    }

    /// Client over the given stub and storage.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn with(backend: Arc<StubBackend>, storage: Arc<MemoryStorage>) -> Self {
        let config = ClientConfig::new("http://stub.invalid/".parse().expect("valid url"));
        Self::with_config(config, backend, storage)
    }

    /// Client with the given timing over a fresh stub and empty storage.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn with_sync(sync: SyncConfig) -> Self {
        let mut config = ClientConfig::new("http://stub.invalid/".parse().expect("valid url"));
        config.sync = sync;
        Self::with_config(config, StubBackend::new(), Arc::new(MemoryStorage::new()))
    }

    fn with_config(config: ClientConfig, backend: Arc<StubBackend>, storage: Arc<MemoryStorage>) -> Self {
        let client = PricePulse::with_backends(config, Backends::uniform(Arc::clone(&backend)), storage.clone())
            .expect("client builds");
        Self {
            client,
            backend,
            storage,
        }
    }

    /// Sign in as `user@example.com`.
    ///
    /// # Panics
    ///
    /// Panics if the stub rejects the login.
    pub async fn sign_in(&self) {
        let credentials =
            pricepulse_client::session::Credentials::password("user@example.com", PASSWORD).expect("valid email");
        self.client.session().login(credentials).await.expect("login succeeds");
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage entries for a previously signed-in user.
///
/// # Panics
///
/// Panics if the identity cannot be serialized.
#[must_use]
pub fn persisted_session(token: &str, email: &str) -> Arc<MemoryStorage> {
    let identity = Identity {
        id: UserId::new("user-restored"),
        email: Email::parse(email).expect("valid email"),
        name: Some("Restored User".to_string()),
    };
    let user = serde_json::to_string(&identity).expect("identity serializes");
    Arc::new(MemoryStorage::with_entries([
        (TOKEN_KEY.to_string(), token.to_string()),
        (USER_KEY.to_string(), user),
    ]))
}

//! Client state shared by every front end.
//!
//! [`PricePulse`] wires the components together: one session store gating
//! everything, one product collection written by the tracking orchestrator
//! and the polling scheduler, and the gateway credential kept in step with
//! the session.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use pricepulse_core::{HistoryRange, PriceWindow, ProductId, TrackedProduct};

use crate::alerts::AlertSubmitter;
use crate::config::{ClientConfig, ConfigError};
use crate::error::ClientError;
use crate::gateway::{AlertBackend, ApiClient, AuthBackend, ProductBackend};
use crate::polling::PollingScheduler;
use crate::products::{ProductCollection, ProductManager};
use crate::session::{
    AnonymousProvider, AuthMode, AuthProvider, FederatedProvider, OtpRegistration,
    RegistrationProfile, SessionEvent, SessionStorage, SessionStore, Subscription, TokenProvider,
};
use crate::tracking::TrackingOrchestrator;

/// Backend implementations used by the client.
#[derive(Clone)]
pub struct Backends {
    /// Auth endpoints.
    pub auth: Arc<dyn AuthBackend>,
    /// Product endpoints.
    pub products: Arc<dyn ProductBackend>,
    /// Alert endpoints.
    pub alerts: Arc<dyn AlertBackend>,
}

impl Backends {
    /// Use one implementation for every endpoint family.
    #[must_use]
    pub fn uniform<B>(backend: Arc<B>) -> Self
    where
        B: AuthBackend + ProductBackend + AlertBackend + 'static,
    {
        Self {
            auth: backend.clone(),
            products: backend.clone(),
            alerts: backend,
        }
    }
}

/// The PricePulse client.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PricePulse {
    inner: Arc<PricePulseInner>,
}

struct PricePulseInner {
    config: ClientConfig,
    auth: Arc<dyn AuthBackend>,
    session: SessionStore,
    collection: ProductCollection,
    products: ProductManager,
    tracking: TrackingOrchestrator,
    polling: PollingScheduler,
    alerts: AlertSubmitter,
    federated: Option<Arc<FederatedProvider>>,
    _subscriptions: Vec<Subscription>,
}

impl PricePulse {
    /// Create a client talking to the REST backend in `config`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built or federated mode
    /// lacks its settings.
    pub fn new(config: ClientConfig, storage: Arc<dyn SessionStorage>) -> Result<Self, ClientError> {
        let api = Arc::new(ApiClient::new(&config)?);
        let backends = Backends::uniform(Arc::clone(&api));

        // Attach the session credential to every request made from now on.
        let credential_sink = move |event: &SessionEvent| {
            api.set_credential(event.session().and_then(|s| s.credential().cloned()));
        };

        Self::build(config, backends, storage, Some(Box::new(credential_sink)))
    }

    /// Create a client over arbitrary backend implementations.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if federated mode lacks its settings.
    pub fn with_backends(
        config: ClientConfig,
        backends: Backends,
        storage: Arc<dyn SessionStorage>,
    ) -> Result<Self, ClientError> {
        Self::build(config, backends, storage, None)
    }

    fn build(
        config: ClientConfig,
        backends: Backends,
        storage: Arc<dyn SessionStorage>,
        credential_sink: Option<Box<dyn Fn(&SessionEvent) + Send + Sync>>,
    ) -> Result<Self, ClientError> {
        let mut federated = None;
        let provider: Arc<dyn AuthProvider> = match config.auth_mode {
            AuthMode::Token => Arc::new(TokenProvider::new(Arc::clone(&backends.auth))),
            AuthMode::Anonymous => Arc::new(AnonymousProvider),
            AuthMode::Federated => {
                let settings = config.federated.clone().ok_or_else(|| {
                    ConfigError::MissingEnvVar("PRICEPULSE_FEDERATED_CLIENT_ID".to_string())
                })?;
                let provider = Arc::new(FederatedProvider::new(Arc::clone(&backends.auth), settings));
                federated = Some(Arc::clone(&provider));
                provider
            }
        };

        let session = SessionStore::new(provider, storage);
        let collection = ProductCollection::new();
        let products = ProductManager::new(
            Arc::clone(&backends.products),
            collection.clone(),
            session.clone(),
        );
        let tracking = TrackingOrchestrator::new(
            Arc::clone(&backends.products),
            collection.clone(),
            session.clone(),
            &config.sync,
        );
        let polling = PollingScheduler::new(products.clone(), session.clone(), &config.sync);
        let alerts = AlertSubmitter::new(Arc::clone(&backends.alerts), session.clone());

        let mut subscriptions = Vec::new();
        if let Some(sink) = credential_sink {
            subscriptions.push(session.subscribe(sink));
        }

        // A new or ended session never sees the previous session's products.
        let on_event = collection.clone();
        subscriptions.push(session.subscribe(move |event| match event {
            SessionEvent::Restored(_) | SessionEvent::SignedIn(_) | SessionEvent::SignedOut => {
                on_event.reset();
            }
            SessionEvent::IdentityUpdated(_) => {}
        }));

        info!(
            api_url = %config.api_base_url,
            auth_mode = %config.auth_mode,
            "client initialized"
        );

        Ok(Self {
            inner: Arc::new(PricePulseInner {
                config,
                auth: backends.auth,
                session,
                collection,
                products,
                tracking,
                polling,
                alerts,
                federated,
                _subscriptions: subscriptions,
            }),
        })
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The session store.
    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    /// The local product collection.
    #[must_use]
    pub fn collection(&self) -> &ProductCollection {
        &self.inner.collection
    }

    /// Product refresh, removal and tracking toggles.
    #[must_use]
    pub fn products(&self) -> &ProductManager {
        &self.inner.products
    }

    /// The tracking orchestrator.
    #[must_use]
    pub fn tracking(&self) -> &TrackingOrchestrator {
        &self.inner.tracking
    }

    /// The polling scheduler.
    #[must_use]
    pub fn polling(&self) -> &PollingScheduler {
        &self.inner.polling
    }

    /// The alert submitter.
    #[must_use]
    pub fn alerts(&self) -> &AlertSubmitter {
        &self.inner.alerts
    }

    /// The federated provider, in federated mode.
    #[must_use]
    pub fn federated(&self) -> Option<&FederatedProvider> {
        self.inner.federated.as_deref()
    }

    /// Begin an email-verified signup for `profile`.
    #[must_use]
    pub fn start_registration(&self, profile: RegistrationProfile) -> OtpRegistration {
        OtpRegistration::new(Arc::clone(&self.inner.auth), profile)
    }

    /// Submit `url` for tracking, then refresh the list once.
    ///
    /// A failed follow-up refresh is logged; the tracked product is still
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the `TrackingError` from submission.
    pub async fn track(&self, url: &str) -> Result<TrackedProduct, ClientError> {
        let product = self.inner.tracking.submit(url).await?;
        if let Err(e) = self.inner.products.refresh_list().await {
            warn!(error = %e, "refresh after tracking failed");
        }
        Ok(self.inner.collection.get(&product.id).unwrap_or(product))
    }

    /// Fetch one product and window its history to `range`.
    ///
    /// # Errors
    ///
    /// Returns the `ProductError` from the fetch.
    pub async fn price_window(
        &self,
        id: &ProductId,
        range: HistoryRange,
    ) -> Result<(TrackedProduct, PriceWindow), ClientError> {
        let product = self.inner.products.refresh_product(id).await?;
        let window = product.price_window(range, Utc::now());
        Ok((product, window))
    }
}

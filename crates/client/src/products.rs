//! Local tracked-product collection and the operations that refresh it.
//!
//! Every write replaces the whole collection with a new snapshot; readers
//! hold an `Arc` to the snapshot they were given and never see a partial
//! update. An epoch counter advances whenever the owning session ends so
//! that work started under an old session can detect it is stale.

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, instrument};

use pricepulse_core::{ProductId, TrackedProduct};

use crate::gateway::{GatewayError, ProductBackend};
use crate::session::SessionStore;

/// Errors from product operations.
#[derive(Debug, Error)]
pub enum ProductError {
    /// No session is active.
    #[error("sign in to manage tracked products")]
    NoSession,

    /// The product is not in the local collection.
    #[error("product not found: {0}")]
    NotFound(ProductId),

    /// The session changed while the request was in flight; the result was discarded.
    #[error("session changed before the request completed")]
    Stale,

    /// Backend call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Default)]
struct Snapshot {
    products: Arc<Vec<TrackedProduct>>,
    epoch: u64,
    // Set once the server list has been fetched in this epoch.
    loaded: bool,
}

/// Shared, replace-whole collection of the user's tracked products.
#[derive(Clone, Default)]
pub struct ProductCollection {
    inner: Arc<RwLock<Snapshot>>,
}

impl std::fmt::Debug for ProductCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductCollection")
            .field("len", &self.len())
            .field("epoch", &self.epoch())
            .finish()
    }
}

impl ProductCollection {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Snapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<TrackedProduct>> {
        Arc::clone(&self.read().products)
    }

    /// Current epoch. Changes when the owning session ends.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Whether the server list has been fetched since the epoch began.
    ///
    /// An empty collection that was never loaded says nothing about what the
    /// user already tracks.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.read().loaded
    }

    /// Number of products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().products.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().products.is_empty()
    }

    /// Look up a product by ID.
    #[must_use]
    pub fn get(&self, id: &ProductId) -> Option<TrackedProduct> {
        self.read().products.iter().find(|p| &p.id == id).cloned()
    }

    /// Whether a product with exactly this source URL is tracked.
    #[must_use]
    pub fn contains_url(&self, url: &str) -> bool {
        self.read().products.iter().any(|p| p.source_url == url)
    }

    /// Replace the collection if `epoch` is still current.
    ///
    /// Returns `false` (and changes nothing) for a stale epoch.
    pub fn replace_if_current(&self, epoch: u64, products: Vec<TrackedProduct>) -> bool {
        let mut snapshot = self.write();
        if snapshot.epoch != epoch {
            return false;
        }
        snapshot.products = Arc::new(products);
        snapshot.loaded = true;
        true
    }

    /// Insert or replace one product if `epoch` is still current.
    pub fn upsert_if_current(&self, epoch: u64, product: TrackedProduct) -> bool {
        self.modify_if_current(epoch, |products| {
            match products.iter_mut().find(|p| p.id == product.id) {
                Some(existing) => *existing = product,
                None => products.push(product),
            }
        })
    }

    /// Remove a product. Returns whether it was present.
    pub fn remove(&self, id: &ProductId) -> bool {
        let mut removed = false;
        let epoch = self.epoch();
        self.modify_if_current(epoch, |products| {
            let before = products.len();
            products.retain(|p| &p.id != id);
            removed = products.len() != before;
        });
        removed
    }

    /// Set the tracking flag on a product. Returns whether it was present.
    pub fn set_tracking(&self, id: &ProductId, enabled: bool) -> bool {
        let mut found = false;
        let epoch = self.epoch();
        self.modify_if_current(epoch, |products| {
            if let Some(p) = products.iter_mut().find(|p| &p.id == id) {
                p.tracking_enabled = enabled;
                found = true;
            }
        });
        found
    }

    /// Drop every product and start a new epoch.
    pub fn reset(&self) {
        let mut snapshot = self.write();
        snapshot.products = Arc::new(Vec::new());
        snapshot.epoch += 1;
        snapshot.loaded = false;
    }

    /// Copy, edit and swap in a new snapshot under one write lock.
    fn modify_if_current(&self, epoch: u64, edit: impl FnOnce(&mut Vec<TrackedProduct>)) -> bool {
        let mut snapshot = self.write();
        if snapshot.epoch != epoch {
            return false;
        }
        let mut products = snapshot.products.as_ref().clone();
        edit(&mut products);
        snapshot.products = Arc::new(products);
        true
    }
}

/// Product operations that keep the local collection in step with the backend.
#[derive(Clone)]
pub struct ProductManager {
    backend: Arc<dyn ProductBackend>,
    collection: ProductCollection,
    session: SessionStore,
}

impl ProductManager {
    /// Create a manager over `collection`.
    #[must_use]
    pub fn new(backend: Arc<dyn ProductBackend>, collection: ProductCollection, session: SessionStore) -> Self {
        Self {
            backend,
            collection,
            session,
        }
    }

    /// The collection this manager writes to.
    #[must_use]
    pub const fn collection(&self) -> &ProductCollection {
        &self.collection
    }

    fn require_session(&self) -> Result<u64, ProductError> {
        if self.session.is_active() {
            Ok(self.collection.epoch())
        } else {
            Err(ProductError::NoSession)
        }
    }

    /// Fetch the full product list and replace the local collection.
    ///
    /// # Errors
    ///
    /// Returns `ProductError::NoSession` without a session, `ProductError::Stale`
    /// if the session ended mid-request, or the gateway error.
    #[instrument(skip(self))]
    pub async fn refresh_list(&self) -> Result<Arc<Vec<TrackedProduct>>, ProductError> {
        let epoch = self.require_session()?;
        let products = self.backend.list_products().await?;
        let count = products.len();

        if !self.collection.replace_if_current(epoch, products) {
            debug!("discarding product list fetched under an ended session");
            return Err(ProductError::Stale);
        }
        debug!(count, "product list refreshed");
        Ok(self.collection.snapshot())
    }

    /// Fetch one product with its full history and replace it locally.
    ///
    /// # Errors
    ///
    /// Same as [`refresh_list`](Self::refresh_list).
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn refresh_product(&self, id: &ProductId) -> Result<TrackedProduct, ProductError> {
        let epoch = self.require_session()?;
        let product = self.backend.get_product(id).await?;

        if !self.collection.upsert_if_current(epoch, product.clone()) {
            return Err(ProductError::Stale);
        }
        Ok(product)
    }

    /// Delete a product on the backend and drop it locally.
    ///
    /// # Errors
    ///
    /// Returns `ProductError::NoSession` or the gateway error.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn remove(&self, id: &ProductId) -> Result<(), ProductError> {
        self.require_session()?;
        self.backend.delete_product(id).await?;
        self.collection.remove(id);
        info!("product removed");
        Ok(())
    }

    /// Pause or resume backend price checks for a product.
    ///
    /// # Errors
    ///
    /// Returns `ProductError::NoSession` or the gateway error.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn set_tracking(&self, id: &ProductId, enabled: bool) -> Result<(), ProductError> {
        self.require_session()?;
        self.backend.set_tracking(id, enabled).await?;
        self.collection.set_tracking(id, enabled);
        info!(enabled, "tracking toggled");
        Ok(())
    }
}

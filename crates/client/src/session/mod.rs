//! Auth session store.
//!
//! Holds the current [`Session`], persists it through a [`SessionStorage`],
//! and notifies subscribers of every transition. All auth integrations sit
//! behind one [`AuthProvider`], so callers never depend on a provider's shape.
//!
//! # Ordering
//!
//! Transitions are serialized: a login, logout, restore or identity update
//! runs to completion (including notifying subscribers) before the next one
//! starts. Handlers run synchronously in subscription order. A handler added
//! after a transition does not see it replayed.

mod error;
pub mod otp;
mod provider;
pub mod storage;

pub use error::AuthError;
pub use otp::{CodeInput, OtpChallenge, OtpError, OtpRegistration, OtpState};
pub use provider::{
    AnonymousProvider, AuthMode, AuthProvider, CallbackParams, Credentials, FederatedProvider,
    MIN_PASSWORD_LENGTH, ParseAuthModeError, RegistrationProfile, TokenProvider,
};
pub use storage::{FileStorage, MemoryStorage, SessionStorage, StorageError, TOKEN_KEY, USER_KEY};

use core::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument, warn};

use pricepulse_core::{Identity, SessionSource};

/// The authenticated identity and credential of the current user.
#[derive(Clone)]
pub struct Session {
    /// Who is signed in.
    pub identity: Identity,
    /// Bearer token. `None` for local-only sessions.
    credential: Option<SecretString>,
    /// Which integration established the session.
    pub source: SessionSource,
}

impl Session {
    /// Create a session.
    #[must_use]
    pub const fn new(identity: Identity, credential: Option<SecretString>, source: SessionSource) -> Self {
        Self {
            identity,
            credential,
            source,
        }
    }

    /// Bearer token attached to backend requests.
    #[must_use]
    pub const fn credential(&self) -> Option<&SecretString> {
        self.credential.as_ref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .field("source", &self.source)
            .finish()
    }
}

/// A session transition delivered to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A persisted session was restored at startup.
    Restored(Session),
    /// A user logged in or registered.
    SignedIn(Session),
    /// The provider pushed an updated identity for the active session.
    IdentityUpdated(Session),
    /// The session ended.
    SignedOut,
}

impl SessionEvent {
    /// The session after the transition, if one is active.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        match self {
            Self::Restored(s) | Self::SignedIn(s) | Self::IdentityUpdated(s) => Some(s),
            Self::SignedOut => None,
        }
    }
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

/// Handle returned by [`SessionStore::subscribe`].
///
/// Dropping the handle also unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Stop this subscription. Other subscriptions are unaffected.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handlers
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Single owner of the current session.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    provider: Arc<dyn AuthProvider>,
    storage: Arc<dyn SessionStorage>,
    current: RwLock<Option<Session>>,
    registry: Arc<Mutex<Registry>>,
    /// Serializes transitions so subscribers observe them in order.
    transition: tokio::sync::Mutex<()>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("provider", &self.inner.provider.name())
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create a store with no active session.
    #[must_use]
    pub fn new(provider: Arc<dyn AuthProvider>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                provider,
                storage,
                current: RwLock::new(None),
                registry: Arc::new(Mutex::new(Registry::default())),
                transition: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Source recorded on sessions created by this store's provider.
    #[must_use]
    pub fn source(&self) -> SessionSource {
        self.inner.provider.source()
    }

    /// The active session, if any.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a session is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Register `handler` for session transitions.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let mut registry = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, Arc::new(handler)));

        Subscription {
            id,
            registry: Arc::downgrade(&self.inner.registry),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }

    /// Reconstruct the persisted session at startup.
    ///
    /// Never fails: missing entries mean no session, and unreadable or
    /// unparseable entries are cleared and treated the same way.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> Option<Session> {
        let _guard = self.inner.transition.lock().await;

        let session = match self.load_persisted().await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "discarding unreadable persisted session");
                if let Err(e) = self.clear_persisted().await {
                    warn!(error = %e, "failed to clear persisted session");
                }
                return None;
            }
        };

        info!(user_id = %session.identity.id, source = %session.source, "session restored");
        self.set_current(Some(session.clone()));
        self.publish(&SessionEvent::Restored(session.clone()));
        Some(session)
    }

    async fn load_persisted(&self) -> Result<Option<Session>, StorageError> {
        let token = self.inner.storage.get(TOKEN_KEY).await?;
        let user = self.inner.storage.get(USER_KEY).await?;

        match (token, user) {
            (None, None) => Ok(None),
            (Some(token), Some(user)) => {
                if token.trim().is_empty() {
                    return Err(StorageError::Corrupt("empty token".to_string()));
                }
                let identity: Identity = serde_json::from_str(&user)
                    .map_err(|e| StorageError::Corrupt(format!("identity: {e}")))?;
                Ok(Some(Session::new(
                    identity,
                    Some(SecretString::from(token)),
                    self.source(),
                )))
            }
            _ => Err(StorageError::Corrupt(
                "token and identity must be stored together".to_string(),
            )),
        }
    }

    /// Exchange credentials for a session through the provider.
    ///
    /// On failure the current session and persisted state are unchanged.
    ///
    /// # Errors
    ///
    /// Returns the provider's `AuthError` (with the server's reason for
    /// rejected credentials), or `AuthError::Storage` if persisting fails.
    #[instrument(skip(self, credentials))]
    pub async fn login(&self, credentials: Credentials) -> Result<Session, AuthError> {
        let _guard = self.inner.transition.lock().await;
        let session = self.inner.provider.authenticate(credentials).await?;
        self.establish_locked(session).await
    }

    /// Create an account through the provider and sign in.
    ///
    /// # Errors
    ///
    /// Returns the provider's `AuthError`, or `AuthError::Storage` if
    /// persisting fails.
    #[instrument(skip(self, profile), fields(email = %profile.email))]
    pub async fn register(&self, profile: &RegistrationProfile) -> Result<Session, AuthError> {
        let _guard = self.inner.transition.lock().await;
        let session = self.inner.provider.register(profile).await?;
        self.establish_locked(session).await
    }

    /// Adopt a session issued outside the provider (code verification).
    pub(crate) async fn establish(&self, session: Session) -> Result<Session, AuthError> {
        let _guard = self.inner.transition.lock().await;
        self.establish_locked(session).await
    }

    async fn establish_locked(&self, session: Session) -> Result<Session, AuthError> {
        self.persist(&session).await?;
        info!(
            user_id = %session.identity.id,
            source = %session.source,
            "session established"
        );
        self.set_current(Some(session.clone()));
        self.publish(&SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    /// End the session and clear persisted state.
    ///
    /// Idempotent: without an active session nothing is published.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the persisted entries could not be
    /// removed. The in-memory session is cleared regardless.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _guard = self.inner.transition.lock().await;

        let previous = self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let cleared = self.clear_persisted().await;

        if let Some(previous) = previous {
            info!(user_id = %previous.identity.id, "session ended");
            self.publish(&SessionEvent::SignedOut);
        }
        cleared.map_err(AuthError::from)
    }

    /// Publish an identity pushed by the provider for the active session.
    ///
    /// Returns `None` (and publishes nothing) when no session is active.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the updated snapshot cannot be persisted.
    #[instrument(skip(self, identity), fields(user_id = %identity.id))]
    pub async fn apply_identity_update(&self, identity: Identity) -> Result<Option<Session>, AuthError> {
        let _guard = self.inner.transition.lock().await;

        let Some(mut session) = self.current() else {
            return Ok(None);
        };
        session.identity = identity;
        self.persist(&session).await?;
        self.set_current(Some(session.clone()));
        self.publish(&SessionEvent::IdentityUpdated(session.clone()));
        Ok(Some(session))
    }

    /// Write both entries. Local-only sessions are never persisted.
    async fn persist(&self, session: &Session) -> Result<(), StorageError> {
        let Some(token) = session.credential() else {
            return Ok(());
        };
        let user = serde_json::to_string(&session.identity)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        self.inner
            .storage
            .set_many(&[
                (TOKEN_KEY, token.expose_secret().to_string()),
                (USER_KEY, user),
            ])
            .await
    }

    async fn clear_persisted(&self) -> Result<(), StorageError> {
        self.inner.storage.remove_many(&[TOKEN_KEY, USER_KEY]).await
    }

    fn set_current(&self, session: Option<Session>) {
        *self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn publish(&self, event: &SessionEvent) {
        // Snapshot so handlers may subscribe or unsubscribe while running.
        let handlers: Vec<Handler> = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(AnonymousProvider), Arc::new(MemoryStorage::new()))
    }

    fn anonymous() -> Credentials {
        Credentials::Anonymous { name: None }
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_only_that_subscription() {
        let store = store();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        let a2 = Arc::clone(&a);
        let sub_a = store.subscribe(move |_| {
            a2.fetch_add(1, Ordering::SeqCst);
        });
        let b2 = Arc::clone(&b);
        let _sub_b = store.subscribe(move |_| {
            b2.fetch_add(1, Ordering::SeqCst);
        });

        store.login(anonymous()).await.unwrap();
        sub_a.unsubscribe();
        store.logout().await.unwrap();

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 2);
        assert_eq!(store.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let store = store();
        store.login(anonymous()).await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let _sub = store.subscribe(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        store.logout().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let store = store();
        let events = Arc::new(Mutex::new(Vec::new()));
        let events2 = Arc::clone(&events);
        let _sub = store.subscribe(move |e| {
            events2.lock().unwrap().push(e.session().is_some());
        });

        store.login(anonymous()).await.unwrap();
        store.logout().await.unwrap();
        store.logout().await.unwrap();

        assert_eq!(*events.lock().unwrap(), vec![true, false]);
        assert!(!store.is_active());
    }

    #[tokio::test]
    async fn test_anonymous_session_is_not_persisted() {
        let storage = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(Arc::new(AnonymousProvider), storage.clone());
        store.login(anonymous()).await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_identity_update_without_session_is_ignored() {
        let store = store();
        let identity = Identity {
            id: pricepulse_core::UserId::new("u1"),
            email: pricepulse_core::Email::parse("a@b.co").unwrap(),
            name: None,
        };
        assert!(store.apply_identity_update(identity).await.unwrap().is_none());
    }

    #[test]
    fn test_session_debug_redacts_credential() {
        let session = Session::new(
            Identity {
                id: pricepulse_core::UserId::new("u1"),
                email: pricepulse_core::Email::parse("a@b.co").unwrap(),
                name: None,
            },
            Some(SecretString::from("tok-secret")),
            SessionSource::Token,
        );
        assert!(!format!("{session:?}").contains("tok-secret"));
    }
}

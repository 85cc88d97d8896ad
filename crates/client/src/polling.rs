//! Polling scheduler.
//!
//! Two independent recurring refreshes, both alive only while a session is
//! active:
//!
//! - **list** re-fetches the whole product collection
//! - **detail** re-fetches one product while its detail view is open
//!
//! Views start and stop them explicitly. Every timer is stopped when the
//! session ends. A stopped timer issues no further requests, and a request
//! in flight when it stops is dropped.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pricepulse_core::ProductId;

use crate::config::SyncConfig;
use crate::products::{ProductError, ProductManager};
use crate::session::{SessionEvent, SessionStore, Subscription};

/// Errors from the polling scheduler.
#[derive(Debug, Error)]
pub enum PollingError {
    /// Timers only run while a session is active.
    #[error("no active session to refresh for")]
    NoSession,

    /// A zero period would refresh without pause.
    #[error("{0} refresh period must be greater than zero")]
    ZeroPeriod(&'static str),
}

/// Handle to a running refresh timer.
#[derive(Debug, Clone)]
pub struct PollHandle {
    token: CancellationToken,
}

impl PollHandle {
    /// Stop the timer. Safe to call more than once.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether the timer has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Default)]
struct Timers {
    list: Option<PollHandle>,
    detail: Option<(ProductId, PollHandle)>,
}

impl Timers {
    fn stop_all(&mut self) {
        if let Some(list) = self.list.take() {
            list.stop();
        }
        if let Some((_, detail)) = self.detail.take() {
            detail.stop();
        }
    }
}

/// Owns the list and detail refresh timers.
pub struct PollingScheduler {
    products: ProductManager,
    session: SessionStore,
    list_period: Duration,
    detail_period: Duration,
    timers: Arc<Mutex<Timers>>,
    _session_end: Subscription,
}

impl PollingScheduler {
    /// Create a scheduler that stops every timer when the session ends.
    #[must_use]
    pub fn new(products: ProductManager, session: SessionStore, sync: &SyncConfig) -> Self {
        let timers = Arc::new(Mutex::new(Timers::default()));

        let on_event = Arc::downgrade(&timers);
        let subscription = session.subscribe(move |event| {
            if matches!(event, SessionEvent::SignedOut)
                && let Some(timers) = on_event.upgrade()
            {
                timers.lock().unwrap_or_else(PoisonError::into_inner).stop_all();
                info!("refresh timers stopped at session end");
            }
        });

        Self {
            products,
            session,
            list_period: sync.list_refresh,
            detail_period: sync.detail_refresh,
            timers,
            _session_end: subscription,
        }
    }

    fn timers(&self) -> std::sync::MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_start(&self, kind: &'static str, period: Duration) -> Result<(), PollingError> {
        if !self.session.is_active() {
            return Err(PollingError::NoSession);
        }
        if period.is_zero() {
            return Err(PollingError::ZeroPeriod(kind));
        }
        Ok(())
    }

    /// Start (or restart) the product list refresh.
    ///
    /// # Errors
    ///
    /// Returns `PollingError::NoSession` without an active session, or
    /// `PollingError::ZeroPeriod` if the list period is zero.
    pub fn start_list_refresh(&self) -> Result<PollHandle, PollingError> {
        self.check_start("list", self.list_period)?;

        let products = self.products.clone();
        let handle = spawn_refresh("list", self.list_period, move || {
            let products = products.clone();
            async move { products.refresh_list().await.map(|_| ()) }
        });

        if let Some(previous) = self.timers().list.replace(handle.clone()) {
            previous.stop();
        }
        info!(period_secs = self.list_period.as_secs(), "list refresh started");
        Ok(handle)
    }

    /// Stop the product list refresh.
    pub fn stop_list_refresh(&self) {
        if let Some(handle) = self.timers().list.take() {
            handle.stop();
            info!("list refresh stopped");
        }
    }

    /// Start refreshing one product, replacing any previous detail refresh.
    ///
    /// # Errors
    ///
    /// Returns `PollingError::NoSession` without an active session, or
    /// `PollingError::ZeroPeriod` if the detail period is zero.
    pub fn start_detail_refresh(&self, id: ProductId) -> Result<PollHandle, PollingError> {
        self.check_start("detail", self.detail_period)?;

        let products = self.products.clone();
        let product_id = id.clone();
        let handle = spawn_refresh("detail", self.detail_period, move || {
            let products = products.clone();
            let id = product_id.clone();
            async move { products.refresh_product(&id).await.map(|_| ()) }
        });

        if let Some((_, previous)) = self.timers().detail.replace((id.clone(), handle.clone())) {
            previous.stop();
        }
        info!(product_id = %id, period_secs = self.detail_period.as_secs(), "detail refresh started");
        Ok(handle)
    }

    /// Stop the detail refresh, if one is running.
    pub fn stop_detail_refresh(&self) {
        if let Some((id, handle)) = self.timers().detail.take() {
            handle.stop();
            info!(product_id = %id, "detail refresh stopped");
        }
    }

    /// Product whose detail refresh is running.
    #[must_use]
    pub fn detail_product(&self) -> Option<ProductId> {
        self.timers().detail.as_ref().map(|(id, _)| id.clone())
    }

    /// Stop every timer.
    pub fn stop_all(&self) {
        self.timers().stop_all();
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner).stop_all();
    }
}

/// Spawn a task that runs `refresh` every `period` until cancelled.
///
/// The first refresh happens one period after start.
fn spawn_refresh<F, Fut>(kind: &'static str, period: Duration, refresh: F) -> PollHandle
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ProductError>> + Send + 'static,
{
    let token = CancellationToken::new();
    let task_token = token.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = task_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                () = task_token.cancelled() => break,
                result = refresh() => match result {
                    Ok(()) => debug!(kind, "scheduled refresh complete"),
                    Err(ProductError::Stale | ProductError::NoSession) => break,
                    Err(e) => warn!(kind, error = %e, "scheduled refresh failed"),
                },
            }
        }
        // The handle reports stopped however the task ended.
        task_token.cancel();
        debug!(kind, "refresh task exited");
    });

    PollHandle { token }
}

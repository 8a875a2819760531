//! Facade wiring the query layer, the live subscriber, and the order book.

use std::sync::Arc;

use tracing::instrument;

use forno_core::{Order, TrackingIdentity};

use crate::error::TrackingError;
use crate::realtime::{ChangeFeed, OrderSubscriber, SubscriptionHandle, SubscriptionState};
use crate::reconcile::OrderBook;
use crate::store::{OrderStoreClient, StoreError};

/// Outcome of an authoritative refresh.
#[derive(Debug)]
pub struct RefreshReport {
    /// How many records changed state in the order book.
    pub applied: usize,
    /// Set when one of the two visibility queries failed; the book still
    /// holds best-effort data from the other.
    pub partial_error: Option<StoreError>,
}

/// Client-side order tracking for one viewer.
///
/// Owns the in-memory order book; the query layer and the live subscriber
/// both write into it through the reconciliation merge, so a slow fetch can
/// never overwrite a newer live update.
pub struct OrderTracker<F: ChangeFeed> {
    store: OrderStoreClient,
    subscriber: OrderSubscriber<F>,
    identity: TrackingIdentity,
    book: Arc<OrderBook>,
}

impl<F: ChangeFeed> OrderTracker<F> {
    /// Create a tracker for the given viewer identity.
    #[must_use]
    pub fn new(
        store: OrderStoreClient,
        subscriber: OrderSubscriber<F>,
        identity: TrackingIdentity,
    ) -> Self {
        Self {
            store,
            subscriber,
            identity,
            book: Arc::new(OrderBook::new()),
        }
    }

    /// The viewer identity this tracker serves.
    #[must_use]
    pub const fn identity(&self) -> &TrackingIdentity {
        &self.identity
    }

    /// Snapshot of the known orders, most recently created first.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.book.snapshot()
    }

    /// Authoritatively fetch the visible orders and merge them in.
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::Store` when every visibility query failed;
    /// a single-sided failure is reported through the returned
    /// [`RefreshReport::partial_error`] alongside best-effort data.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<RefreshReport, TrackingError> {
        let visible = self.store.fetch_visible(&self.identity).await?;
        let applied = self.book.merge_all(visible.orders);
        Ok(RefreshReport {
            applied,
            partial_error: visible.partial_error,
        })
    }

    /// Start a live subscription without waiting for it to go live.
    ///
    /// Most callers want [`OrderTracker::watch`] instead, which also
    /// performs the authoritative fetch required after confirmation.
    pub fn subscribe<C>(&self, on_change: C) -> SubscriptionHandle
    where
        C: FnMut(Order) + Send + 'static,
    {
        self.subscriber
            .subscribe(self.identity.clone(), Arc::clone(&self.book), on_change)
    }

    /// Subscribe, wait for the subscription to go live, then fetch.
    ///
    /// The fetch after reaching `Subscribed` is what closes the gap for
    /// events that occurred before the transport confirmed; the stream
    /// alone is not authoritative for initial state.
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::SubscriptionFailed` if the subscription
    /// settled in `Error` or `Closed` instead of going live, or a store
    /// error if the follow-up fetch failed entirely.
    #[instrument(skip(self, on_change))]
    pub async fn watch<C>(&self, on_change: C) -> Result<SubscriptionHandle, TrackingError>
    where
        C: FnMut(Order) + Send + 'static,
    {
        let mut handle = self.subscribe(on_change);

        let state = handle.wait_until_live().await;
        if state != SubscriptionState::Subscribed {
            return Err(TrackingError::SubscriptionFailed(state));
        }

        let report = self.refresh().await?;
        if let Some(e) = &report.partial_error {
            tracing::warn!(error = %e, "Initial fetch after subscribe was partial");
        }

        Ok(handle)
    }
}

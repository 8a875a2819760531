//! Live order-update subscription.
//!
//! A subscription walks an explicit state machine:
//!
//! ```text
//! Idle -> Connecting -> Subscribed -> (Error | Closed)
//! ```
//!
//! - Events are only guaranteed in full once `Subscribed` is reached;
//!   callers must perform an authoritative fetch right after (the
//!   [`OrderTracker`](crate::tracker::OrderTracker) facade does this).
//! - The subscriber never auto-reconnects. A transport drop moves the
//!   state to `Error`; the caller resubscribes and re-fetches to close the
//!   gap.
//! - Unsubscribing is idempotent and moves any state to `Closed`; no
//!   events are delivered afterwards.
//!
//! Incoming events are filtered through [`reconcile::matches`] against the
//! active identity and the already-known order set before they touch the
//! order book or the caller's callback.
//!
//! [`reconcile::matches`]: crate::reconcile::matches

mod feed;
mod http;

pub use feed::{ChangeEvent, ChangeFeed, FeedError, FeedFilter, FeedMessage, FeedRequest};
pub use http::HttpChangeFeed;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::instrument;

use forno_core::{Order, TrackingIdentity};

use crate::config::TrackingConfig;
use crate::reconcile::{matches, OrderBook};

/// Observable state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Not started.
    Idle,
    /// Waiting for the transport to confirm the subscription.
    Connecting,
    /// Live; events are delivered in full from here on.
    Subscribed,
    /// The transport failed or never confirmed. The caller must
    /// resubscribe and re-fetch.
    Error,
    /// Explicitly unsubscribed; resources released.
    Closed,
}

impl SubscriptionState {
    /// Whether the subscription has stopped for good.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Error | Self::Closed)
    }
}

/// Handle to a running subscription.
///
/// Dropping the handle does not stop the subscription; call
/// [`SubscriptionHandle::unsubscribe`].
pub struct SubscriptionHandle {
    state_rx: watch::Receiver<SubscriptionState>,
    cancel_tx: watch::Sender<bool>,
}

impl SubscriptionHandle {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.state_rx.borrow()
    }

    /// A receiver for observing state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SubscriptionState> {
        self.state_rx.clone()
    }

    /// Wait until the subscription leaves the connecting phase, returning
    /// the state it settled in (`Subscribed`, `Error` or `Closed`).
    pub async fn wait_until_live(&mut self) -> SubscriptionState {
        loop {
            let state = *self.state_rx.borrow();
            if state != SubscriptionState::Idle && state != SubscriptionState::Connecting {
                return state;
            }
            if self.state_rx.changed().await.is_err() {
                // Task gone without a final state; treat as failed.
                return SubscriptionState::Error;
            }
        }
    }

    /// Stop the subscription and release the transport.
    ///
    /// Idempotent: safe to call any number of times. After the first call
    /// no further events are delivered.
    pub fn unsubscribe(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

/// Subscribes to order changes and reconciles them into an order book.
pub struct OrderSubscriber<F: ChangeFeed> {
    feed: Arc<F>,
    table: String,
    confirm_timeout: Duration,
}

impl<F: ChangeFeed> OrderSubscriber<F> {
    /// Create a subscriber over the given feed.
    #[must_use]
    pub fn new(feed: F, config: &TrackingConfig) -> Self {
        Self {
            feed: Arc::new(feed),
            table: config.orders_table.clone(),
            confirm_timeout: config.subscribe_timeout,
        }
    }

    /// Start a subscription for the given identity.
    ///
    /// Matching events are merged into `book`; `on_change` is invoked with
    /// the merged record for every event that changed state (stale events
    /// and non-matching events are dropped silently).
    ///
    /// When the identity is authenticated the feed is opened with the
    /// server-side `user_id` predicate; anonymous identities consume the
    /// unfiltered table stream. Either way every event passes the
    /// client-side match before being applied.
    #[instrument(skip(self, book, on_change), fields(table = %self.table))]
    pub fn subscribe<C>(
        &self,
        identity: TrackingIdentity,
        book: Arc<OrderBook>,
        on_change: C,
    ) -> SubscriptionHandle
    where
        C: FnMut(Order) + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Idle);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let request = FeedRequest {
            table: self.table.clone(),
            filter: identity
                .user_id
                .clone()
                .map(|user_id| FeedFilter { user_id }),
        };

        tokio::spawn(run_subscription(
            Arc::clone(&self.feed),
            request,
            identity,
            book,
            on_change,
            state_tx,
            cancel_rx,
            self.confirm_timeout,
        ));

        SubscriptionHandle {
            state_rx,
            cancel_tx,
        }
    }
}

/// Drive one subscription from `Connecting` to a final state.
#[allow(clippy::too_many_arguments)]
async fn run_subscription<F, C>(
    feed: Arc<F>,
    request: FeedRequest,
    identity: TrackingIdentity,
    book: Arc<OrderBook>,
    mut on_change: C,
    state_tx: watch::Sender<SubscriptionState>,
    mut cancel_rx: watch::Receiver<bool>,
    confirm_timeout: Duration,
) where
    F: ChangeFeed,
    C: FnMut(Order) + Send + 'static,
{
    let _ = state_tx.send(SubscriptionState::Connecting);

    let mut rx = tokio::select! {
        () = cancelled(&mut cancel_rx) => {
            let _ = state_tx.send(SubscriptionState::Closed);
            return;
        }
        opened = feed.open(request) => match opened {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open change feed");
                let _ = state_tx.send(SubscriptionState::Error);
                return;
            }
        }
    };

    // Wait for the transport to confirm the subscription, bounded: a feed
    // that never confirms is indistinguishable from a dead one.
    match await_confirmation(&mut rx, &mut cancel_rx, confirm_timeout).await {
        ConfirmResult::Confirmed => {
            let _ = state_tx.send(SubscriptionState::Subscribed);
            tracing::debug!("Subscription confirmed");
        }
        ConfirmResult::Cancelled => {
            let _ = state_tx.send(SubscriptionState::Closed);
            return;
        }
        ConfirmResult::Failed(reason) => {
            tracing::warn!(reason = %reason, "Subscription never went live");
            let _ = state_tx.send(SubscriptionState::Error);
            return;
        }
    }

    loop {
        tokio::select! {
            () = cancelled(&mut cancel_rx) => {
                let _ = state_tx.send(SubscriptionState::Closed);
                return;
            }
            message = rx.recv() => match message {
                Some(FeedMessage::Change(event)) => {
                    apply_event(event, &identity, &book, &mut on_change);
                }
                Some(FeedMessage::Confirmed) => {
                    // Duplicate confirmation; harmless.
                }
                Some(FeedMessage::Closed { reason }) => {
                    tracing::warn!(reason = %reason, "Change feed closed by transport");
                    let _ = state_tx.send(SubscriptionState::Error);
                    return;
                }
                None => {
                    tracing::warn!("Change feed dropped without close message");
                    let _ = state_tx.send(SubscriptionState::Error);
                    return;
                }
            }
        }
    }
}

/// Filter one event against the viewer and merge it when it matches.
fn apply_event<C>(
    event: ChangeEvent,
    identity: &TrackingIdentity,
    book: &OrderBook,
    on_change: &mut C,
) where
    C: FnMut(Order),
{
    let known = book.known_ids();
    if !matches(&event.record, identity, &known) {
        tracing::debug!(order_id = %event.record.id, "Dropping event for another viewer");
        return;
    }

    if event.record.status_slots_diverged() {
        tracing::warn!(
            order_id = %event.record.id,
            "Incoming event has diverged status slots"
        );
    }

    if let Some(order) = book.merge(event.record).applied() {
        tracing::debug!(order_id = %order.id, status = %order.status, "Applied order update");
        on_change(order);
    } else {
        tracing::debug!("Dropping stale event");
    }
}

enum ConfirmResult {
    Confirmed,
    Cancelled,
    Failed(String),
}

/// Wait for [`FeedMessage::Confirmed`], bounded by the confirm timeout.
async fn await_confirmation(
    rx: &mut mpsc::Receiver<FeedMessage>,
    cancel_rx: &mut watch::Receiver<bool>,
    confirm_timeout: Duration,
) -> ConfirmResult {
    let deadline = tokio::time::sleep(confirm_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = cancelled(cancel_rx) => return ConfirmResult::Cancelled,
            () = &mut deadline => {
                return ConfirmResult::Failed(format!(
                    "no confirmation within {}s",
                    confirm_timeout.as_secs()
                ));
            }
            message = rx.recv() => match message {
                Some(FeedMessage::Confirmed) => return ConfirmResult::Confirmed,
                Some(FeedMessage::Closed { reason }) => return ConfirmResult::Failed(reason),
                Some(FeedMessage::Change(_)) => {
                    // Events before confirmation are not guaranteed in
                    // full; the post-subscribe fetch covers this window.
                }
                None => return ConfirmResult::Failed("transport dropped".to_owned()),
            }
        }
    }
}

/// Resolve once the cancel flag is set.
async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    // wait_for returns Err when the sender is dropped; an abandoned handle
    // means no one can unsubscribe anymore, so just park forever and let
    // the transport side end the task.
    if cancel_rx.wait_for(|cancel| *cancel).await.is_err() {
        std::future::pending::<()>().await;
    }
}

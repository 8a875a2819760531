//! The change-feed transport seam.
//!
//! The platform's realtime service is an external collaborator; this
//! module defines the contract the subscriber consumes. [`HttpChangeFeed`]
//! is the production implementation; tests script their own.
//!
//! [`HttpChangeFeed`]: super::HttpChangeFeed

use thiserror::Error;
use tokio::sync::mpsc;

use forno_core::{Order, UserId};

/// Errors from the change-feed transport.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Opening the feed failed.
    #[error("Feed connect error: {0}")]
    Connect(String),

    /// The transport delivered something the protocol does not allow.
    #[error("Feed protocol error: {0}")]
    Protocol(String),

    /// The transport never confirmed the subscription in time.
    #[error("Feed not confirmed within {0}s")]
    ConfirmTimeout(u64),
}

/// Server-side equality predicate for a feed.
///
/// The platform can pre-filter a table stream by `user_id` only; metadata
/// contents cannot be filtered server-side, so anonymous viewers consume
/// the unfiltered stream and filter client-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    /// Only deliver rows whose `user_id` equals this value.
    pub user_id: UserId,
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    /// Table to watch.
    pub table: String,
    /// Optional server-side predicate.
    pub filter: Option<FeedFilter>,
}

/// A row-change event delivered by the feed.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ChangeEvent {
    /// Table the change happened in.
    pub table: String,
    /// The row after the change.
    pub record: Order,
}

/// Messages delivered over an open feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// The subscription is active; events are delivered in full from here.
    Confirmed,
    /// A row changed.
    Change(ChangeEvent),
    /// The transport is closing the feed.
    Closed {
        /// Human-readable reason, for logging.
        reason: String,
    },
}

/// A source of row-change notifications.
///
/// Implementations hand back a channel; dropping the receiver releases the
/// underlying transport resource (fire-and-forget, no async cleanup).
pub trait ChangeFeed: Send + Sync + 'static {
    /// Open a feed for the given request.
    ///
    /// # Errors
    ///
    /// Returns `FeedError` if the transport cannot be established.
    fn open(
        &self,
        request: FeedRequest,
    ) -> impl Future<Output = Result<mpsc::Receiver<FeedMessage>, FeedError>> + Send;
}

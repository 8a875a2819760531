//! Unified error type for the tracking library.
//!
//! Each layer keeps its own error enum (`ConfigError`, `StoreError`,
//! `FeedError`); this umbrella is what the facade and binaries handle.
//! Identity-storage failures are deliberately absent: the identity
//! provider degrades to a volatile token instead of failing (see
//! [`crate::identity`]).

use thiserror::Error;

use crate::config::ConfigError;
use crate::realtime::{FeedError, SubscriptionState};
use crate::store::StoreError;

/// Top-level error type for order tracking.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// Configuration loading failed.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Order store query or update failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Realtime feed transport failed.
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// A subscription never reached the live state.
    #[error("Subscription failed to go live (state: {0:?})")]
    SubscriptionFailed(SubscriptionState),
}

/// Result type alias for `TrackingError`.
pub type Result<T> = std::result::Result<T, TrackingError>;

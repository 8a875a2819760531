//! Forno Tracking - Order visibility and live-status reconciliation.
//!
//! The Forno d'Oro storefront runs on a managed backend platform (Postgres
//! + auth + realtime behind an HTTP surface). This library is the client
//! side of order tracking:
//!
//! - [`identity`] - Durable pseudo-anonymous device identity
//! - [`store`] - Order queries against the platform's REST surface, merged
//!   across the authenticated and anonymous visibility predicates
//! - [`realtime`] - Live change-notification subscription with an explicit
//!   state machine
//! - [`reconcile`] - The pure match/merge logic deciding which incoming
//!   events belong to the current viewer
//! - [`tracker`] - Facade wiring the above together
//!
//! # Example
//!
//! ```rust,ignore
//! let config = TrackingConfig::from_env()?;
//! let identity = TrackingIdentity::anonymous(
//!     ClientIdentityProvider::new(FileIdentityStore::new(&config.identity_file)).client_id(),
//! );
//! let tracker = OrderTracker::new(
//!     OrderStoreClient::new(&config),
//!     OrderSubscriber::new(HttpChangeFeed::new(&config), &config),
//!     identity,
//! );
//! let handle = tracker.watch(|order| println!("{}: {}", order.order_number, order.status)).await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod identity;
pub mod realtime;
pub mod reconcile;
pub mod store;
pub mod tracker;

pub use config::TrackingConfig;
pub use error::TrackingError;
pub use identity::{ClientIdentityProvider, FileIdentityStore, IdentityStore, MemoryIdentityStore};
pub use realtime::{
    ChangeEvent, ChangeFeed, FeedError, FeedFilter, FeedMessage, FeedRequest, HttpChangeFeed,
    OrderSubscriber, SubscriptionHandle, SubscriptionState,
};
pub use reconcile::{matches, MergeOutcome, OrderBook};
pub use store::{OrderStoreClient, StoreError, VisibleOrders};
pub use tracker::{OrderTracker, RefreshReport};

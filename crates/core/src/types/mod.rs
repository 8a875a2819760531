//! Domain types for order tracking.

mod id;
mod identity;
mod metadata;
mod order;
mod status;

pub use id::{ClientId, OrderId, UserId};
pub use identity::TrackingIdentity;
pub use metadata::OrderMetadata;
pub use order::Order;
pub use status::{OrderStatus, ParseOrderStatusError};

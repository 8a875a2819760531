//! Forno Core - Shared domain types.
//!
//! This crate provides the common types used across the Forno d'Oro
//! order-tracking components:
//! - `tracking` - Order visibility and live-status reconciliation library
//! - `cli` - Command-line tools for tracking and staff status updates
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no async.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, order status, the typed metadata bag, the
//!   order record, and the tracking identity

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;

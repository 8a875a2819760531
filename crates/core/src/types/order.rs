//! The order record as stored by the backend platform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{OrderId, OrderMetadata, OrderStatus, UserId};

/// A pizzeria order.
///
/// Read-only from the client's perspective except for staff-driven status
/// transitions. The schema carries the status in two columns (`status` and
/// `order_status`) - one logical field in two storage slots. They are
/// written together through [`Order::set_status`]; divergence between them
/// is an inconsistent row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Opaque unique identifier, immutable.
    pub id: OrderId,
    /// Human-readable display identifier, immutable.
    pub order_number: String,
    /// Lifecycle status (primary slot).
    pub status: OrderStatus,
    /// Lifecycle status (mirrored slot, kept in sync with `status`).
    pub order_status: OrderStatus,
    /// Authenticated owner; `None` for anonymous orders.
    pub user_id: Option<UserId>,
    /// Open metadata bag, `clientId` attributes anonymous orders.
    #[serde(default, deserialize_with = "null_metadata_as_empty")]
    pub metadata: OrderMetadata,
    /// When the order was placed.
    pub created_at: DateTime<Utc>,
    /// Last mutation time; drives recency ordering and merge decisions.
    pub updated_at: DateTime<Utc>,
}

/// The platform's JSON column delivers absent metadata as `null`;
/// both spell "empty bag" here.
fn null_metadata_as_empty<'de, D>(deserializer: D) -> Result<OrderMetadata, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<OrderMetadata>::deserialize(deserializer)?.unwrap_or_default())
}

impl Order {
    /// Write the status into both storage slots.
    pub const fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
        self.order_status = status;
    }

    /// Detect a row where the two status slots disagree.
    #[must_use]
    pub fn status_slots_diverged(&self) -> bool {
        self.status != self.order_status
    }

    /// Strictly newer by `updated_at`. Equal timestamps are not newer, so
    /// a replayed or duplicated event can never regress merged state.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.updated_at > other.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClientId;
    use chrono::TimeZone;

    fn order(updated_offset_secs: i64) -> Order {
        let base = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).single().expect("valid ts");
        Order {
            id: OrderId::new("o1"),
            order_number: "FD-1001".to_owned(),
            status: OrderStatus::Confirmed,
            order_status: OrderStatus::Confirmed,
            user_id: None,
            metadata: OrderMetadata::with_client_id(ClientId::new("c-1")),
            created_at: base,
            updated_at: base + chrono::Duration::seconds(updated_offset_secs),
        }
    }

    #[test]
    fn test_set_status_writes_both_slots() {
        let mut o = order(0);
        o.set_status(OrderStatus::Ready);
        assert_eq!(o.status, OrderStatus::Ready);
        assert_eq!(o.order_status, OrderStatus::Ready);
        assert!(!o.status_slots_diverged());
    }

    #[test]
    fn test_divergence_detected() {
        let mut o = order(0);
        o.status = OrderStatus::Ready;
        assert!(o.status_slots_diverged());
    }

    #[test]
    fn test_is_newer_than_is_strict() {
        let older = order(0);
        let newer = order(30);
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(!older.is_newer_than(&older.clone()));
    }

    #[test]
    fn test_deserialize_missing_metadata_defaults_empty() {
        let wire = serde_json::json!({
            "id": "o1",
            "order_number": "FD-1001",
            "status": "preparing",
            "order_status": "preparing",
            "user_id": "u1",
            "created_at": "2026-03-14T12:00:00Z",
            "updated_at": "2026-03-14T12:05:00Z"
        });
        let o: Order = serde_json::from_value(wire).expect("deserialize");
        assert!(o.metadata.is_empty());
        assert_eq!(o.user_id, Some(UserId::new("u1")));
    }

    #[test]
    fn test_deserialize_null_metadata_defaults_empty() {
        let wire = serde_json::json!({
            "id": "o1",
            "order_number": "FD-1001",
            "status": "preparing",
            "order_status": "preparing",
            "user_id": null,
            "metadata": null,
            "created_at": "2026-03-14T12:00:00Z",
            "updated_at": "2026-03-14T12:05:00Z"
        });
        let o: Order = serde_json::from_value(wire).expect("deserialize");
        assert!(o.metadata.is_empty());
        assert!(o.user_id.is_none());
    }
}

//! Reconciliation: deciding which change events belong to the viewer and
//! merging them into known state.
//!
//! Orders are visible through two independent predicates (authenticated
//! `user_id`, anonymous `metadata.clientId`), and the realtime stream can
//! race identity changes. [`matches`] is deliberately permissive: any one
//! of three rules is enough, so a legitimate owner update is never missed
//! because the embedded identity fields were momentarily inconsistent.
//!
//! [`OrderBook`] is the single owned in-memory collection. Both the query
//! layer and the live subscriber write into it, only ever through the merge
//! operations, which resolve races by `updated_at` (last write wins, never
//! regressing on an earlier or equal timestamp).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use forno_core::{Order, OrderId, TrackingIdentity};

/// Decide whether a change event's order belongs to the current viewer.
///
/// Matches when ANY of these holds:
/// 1. the viewer's `user_id` equals the order's `user_id`;
/// 2. the viewer's `client_id` equals the order's `metadata.clientId`;
/// 3. the order id is already known to the viewer.
///
/// Rule 3 is the safety net for writers that briefly strip `metadata` on
/// status updates: an order fetched under one identity keeps receiving its
/// updates even if an event arrives with inconsistent identity fields.
#[must_use]
pub fn matches(order: &Order, identity: &TrackingIdentity, known: &HashSet<OrderId>) -> bool {
    if known.contains(&order.id) {
        return true;
    }

    if let (Some(viewer), Some(owner)) = (&identity.user_id, &order.user_id)
        && viewer == owner
    {
        return true;
    }

    if let (Some(viewer), Some(owner)) = (&identity.client_id, &order.metadata.client_id)
        && viewer == owner
    {
        return true;
    }

    false
}

/// Outcome of merging one incoming order record.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The order was not known before; the stored record is returned.
    Inserted(Order),
    /// The incoming record was newer and replaced the known one.
    Updated(Order),
    /// The incoming record was not newer than the known one; state kept.
    Stale,
}

impl MergeOutcome {
    /// The merged order, when the merge changed state.
    #[must_use]
    pub fn applied(self) -> Option<Order> {
        match self {
            Self::Inserted(order) | Self::Updated(order) => Some(order),
            Self::Stale => None,
        }
    }
}

/// The viewer's known orders, keyed by order id.
///
/// All mutation goes through [`OrderBook::merge`] / [`OrderBook::merge_all`];
/// there is no way for callback sites to poke at the map directly.
#[derive(Debug, Default)]
pub struct OrderBook {
    orders: Mutex<HashMap<OrderId, Order>>,
}

impl OrderBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one incoming record, keeping the newer of the known and
    /// incoming versions by `updated_at`.
    ///
    /// An incoming record with an earlier or equal `updated_at` leaves the
    /// book unchanged and reports [`MergeOutcome::Stale`], so replays and
    /// out-of-order deliveries can never roll a status back.
    pub fn merge(&self, incoming: Order) -> MergeOutcome {
        let Ok(mut orders) = self.orders.lock() else {
            // A poisoned lock means a panic mid-merge; drop the event
            // rather than propagate the panic into the transport task.
            tracing::error!(order_id = %incoming.id, "Order book lock poisoned, dropping event");
            return MergeOutcome::Stale;
        };

        match orders.get(&incoming.id) {
            None => {
                orders.insert(incoming.id.clone(), incoming.clone());
                MergeOutcome::Inserted(incoming)
            }
            Some(known) if incoming.is_newer_than(known) => {
                orders.insert(incoming.id.clone(), incoming.clone());
                MergeOutcome::Updated(incoming)
            }
            Some(_) => MergeOutcome::Stale,
        }
    }

    /// Merge an authoritative fetch result.
    ///
    /// Returns how many records changed state. Fetched records go through
    /// the same timestamp arbitration as live events, so a fetch completing
    /// after a newer live update cannot overwrite it.
    pub fn merge_all(&self, incoming: Vec<Order>) -> usize {
        incoming
            .into_iter()
            .map(|order| self.merge(order))
            .filter(|outcome| !matches!(outcome, MergeOutcome::Stale))
            .count()
    }

    /// The ids currently known to the viewer.
    #[must_use]
    pub fn known_ids(&self) -> HashSet<OrderId> {
        self.orders
            .lock()
            .map_or_else(|_| HashSet::new(), |orders| orders.keys().cloned().collect())
    }

    /// Look up one order by id.
    #[must_use]
    pub fn get(&self, id: &OrderId) -> Option<Order> {
        self.orders
            .lock()
            .ok()
            .and_then(|orders| orders.get(id).cloned())
    }

    /// All known orders, most recently created first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Order> {
        let mut all: Vec<Order> = self
            .orders
            .lock()
            .map_or_else(|_| Vec::new(), |orders| orders.values().cloned().collect());
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Number of known orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.lock().map_or(0, |orders| orders.len())
    }

    /// True when no orders are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use forno_core::{ClientId, OrderMetadata, OrderStatus, UserId};

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, minute, 0)
            .single()
            .expect("valid ts")
    }

    fn order(id: &str, status: OrderStatus, updated_minute: u32) -> Order {
        Order {
            id: OrderId::new(id),
            order_number: format!("FD-{id}"),
            status,
            order_status: status,
            user_id: None,
            metadata: OrderMetadata::default(),
            created_at: ts(0),
            updated_at: ts(updated_minute),
        }
    }

    fn owned_by_user(id: &str, user: &str) -> Order {
        let mut o = order(id, OrderStatus::Confirmed, 1);
        o.user_id = Some(UserId::new(user));
        o
    }

    fn owned_by_client(id: &str, client: &str) -> Order {
        let mut o = order(id, OrderStatus::Confirmed, 1);
        o.metadata = OrderMetadata::with_client_id(ClientId::new(client));
        o
    }

    // =========================================================================
    // matches
    // =========================================================================

    #[test]
    fn test_matches_by_user_id() {
        let identity = TrackingIdentity::authenticated(UserId::new("u1"));
        assert!(matches(&owned_by_user("o1", "u1"), &identity, &HashSet::new()));
        assert!(!matches(&owned_by_user("o1", "u2"), &identity, &HashSet::new()));
    }

    #[test]
    fn test_matches_by_client_id() {
        let identity = TrackingIdentity::anonymous(ClientId::new("c1"));
        assert!(matches(&owned_by_client("o1", "c1"), &identity, &HashSet::new()));
        assert!(!matches(&owned_by_client("o1", "c2"), &identity, &HashSet::new()));
    }

    #[test]
    fn test_matches_known_id_regardless_of_identity() {
        // Safety net: a known order matches even with an empty identity and
        // foreign identity fields on the incoming record.
        let known: HashSet<OrderId> = [OrderId::new("o1")].into();
        let mut foreign = owned_by_user("o1", "someone-else");
        foreign.metadata = OrderMetadata::with_client_id(ClientId::new("other-client"));

        assert!(matches(&foreign, &TrackingIdentity::default(), &known));
    }

    #[test]
    fn test_no_match_for_foreign_order() {
        let identity = TrackingIdentity::full(UserId::new("u1"), ClientId::new("c1"));
        let mut foreign = owned_by_user("o9", "other");
        foreign.metadata = OrderMetadata::with_client_id(ClientId::new("other-client"));

        assert!(!matches(&foreign, &identity, &HashSet::new()));
    }

    #[test]
    fn test_empty_identity_fields_never_match_null_owner() {
        // An anonymous order (user_id = None) must not match an identity
        // with user_id = None; absence on both sides is not equality.
        let identity = TrackingIdentity::default();
        assert!(!matches(&order("o1", OrderStatus::Pending, 1), &identity, &HashSet::new()));
    }

    // =========================================================================
    // OrderBook merging
    // =========================================================================

    #[test]
    fn test_merge_inserts_new_order() {
        let book = OrderBook::new();
        let outcome = book.merge(order("o1", OrderStatus::Confirmed, 1));
        assert!(matches!(outcome, MergeOutcome::Inserted(_)));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_merge_newer_wins() {
        let book = OrderBook::new();
        book.merge(order("o1", OrderStatus::Preparing, 1));

        let outcome = book.merge(order("o1", OrderStatus::Ready, 2));
        assert!(matches!(outcome, MergeOutcome::Updated(_)));
        assert_eq!(
            book.get(&OrderId::new("o1")).expect("known").status,
            OrderStatus::Ready
        );
    }

    #[test]
    fn test_merge_earlier_never_regresses() {
        let book = OrderBook::new();
        book.merge(order("o1", OrderStatus::Ready, 5));

        let outcome = book.merge(order("o1", OrderStatus::Preparing, 2));
        assert_eq!(outcome, MergeOutcome::Stale);
        assert_eq!(
            book.get(&OrderId::new("o1")).expect("known").status,
            OrderStatus::Ready
        );
    }

    #[test]
    fn test_merge_equal_timestamp_never_regresses() {
        let book = OrderBook::new();
        book.merge(order("o1", OrderStatus::Ready, 5));

        let outcome = book.merge(order("o1", OrderStatus::Preparing, 5));
        assert_eq!(outcome, MergeOutcome::Stale);
        assert_eq!(
            book.get(&OrderId::new("o1")).expect("known").status,
            OrderStatus::Ready
        );
    }

    #[test]
    fn test_applied_exposes_merged_record() {
        let book = OrderBook::new();

        let inserted = book.merge(order("o1", OrderStatus::Confirmed, 1)).applied();
        assert_eq!(inserted.map(|o| o.id), Some(OrderId::new("o1")));

        // Same timestamp again: stale, nothing to hand to callbacks.
        let replay = book.merge(order("o1", OrderStatus::Confirmed, 1)).applied();
        assert!(replay.is_none());
    }

    #[test]
    fn test_merge_all_counts_applied() {
        let book = OrderBook::new();
        book.merge(order("o1", OrderStatus::Ready, 5));

        let applied = book.merge_all(vec![
            order("o1", OrderStatus::Preparing, 2), // stale
            order("o2", OrderStatus::Confirmed, 1), // inserted
        ]);
        assert_eq!(applied, 1);
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_known_ids_reflects_contents() {
        let book = OrderBook::new();
        book.merge(order("o1", OrderStatus::Confirmed, 1));
        book.merge(order("o2", OrderStatus::Confirmed, 1));

        let known = book.known_ids();
        assert!(known.contains(&OrderId::new("o1")));
        assert!(known.contains(&OrderId::new("o2")));
        assert_eq!(known.len(), 2);
    }

    #[test]
    fn test_snapshot_sorted_by_created_at_desc() {
        let book = OrderBook::new();
        let mut old = order("o-old", OrderStatus::Delivered, 1);
        old.created_at = ts(1);
        let mut new = order("o-new", OrderStatus::Pending, 1);
        new.created_at = ts(30);
        book.merge(old);
        book.merge(new);

        let snapshot = book.snapshot();
        assert_eq!(snapshot.first().map(|o| o.id.as_str()), Some("o-new"));
        assert_eq!(snapshot.last().map(|o| o.id.as_str()), Some("o-old"));
    }
}

//! Order store client over the platform's REST surface.
//!
//! The backend platform exposes Postgres tables through a REST interface
//! with equality filters (`column=eq.value`, including JSON paths like
//! `metadata->>clientId`) and ordering. Row-level security on the platform
//! decides what the anonymous key may read; this client only expresses the
//! visibility predicates.
//!
//! Orders are visible through two independent queries - by authenticated
//! `user_id` and by anonymous `metadata.clientId` - issued concurrently and
//! merged into one set keyed by order id.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::instrument;

use forno_core::{ClientId, Order, OrderId, OrderMetadata, OrderStatus, TrackingIdentity, UserId};

use crate::config::TrackingConfig;

/// Errors from the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("Store returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The store asked us to back off.
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// The response body could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The order does not exist (or is not visible to this key).
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// A write came back without the metadata it was sent with.
    ///
    /// Losing `metadata.clientId` permanently breaks anonymous visibility
    /// for the order, so the write boundary refuses to treat this as
    /// success.
    #[error("Order {0} lost its metadata on write")]
    MetadataLoss(OrderId),
}

/// Result of a merged visibility fetch.
///
/// When exactly one of the two underlying queries fails, the data from the
/// other is still returned, flagged with the error, so callers can show
/// best-effort state plus a non-blocking warning instead of nothing.
#[derive(Debug)]
pub struct VisibleOrders {
    /// Merged, de-duplicated orders, most recently created first.
    pub orders: Vec<Order>,
    /// The failure of one side of the merge, when partial.
    pub partial_error: Option<StoreError>,
}

impl VisibleOrders {
    /// True when both underlying queries succeeded.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.partial_error.is_none()
    }
}

/// Client for the platform's order table.
#[derive(Clone)]
pub struct OrderStoreClient {
    inner: Arc<OrderStoreClientInner>,
}

struct OrderStoreClientInner {
    client: reqwest::Client,
    endpoint: String,
}

impl OrderStoreClient {
    /// Create a new order store client.
    ///
    /// # Panics
    ///
    /// Panics if the anonymous key contains invalid header characters;
    /// configuration validation rejects such keys before this point.
    #[must_use]
    pub fn new(config: &TrackingConfig) -> Self {
        let anon_key = config.anon_key.expose_secret();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "apikey",
            HeaderValue::from_str(anon_key).expect("Invalid anon key for header"),
        );
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {anon_key}"))
                .expect("Invalid anon key for header"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            inner: Arc::new(OrderStoreClientInner {
                client,
                endpoint: config.orders_endpoint(),
            }),
        }
    }

    /// Fetch orders owned by an authenticated user, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails or the response cannot be
    /// parsed.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn fetch_by_user(&self, user_id: &UserId) -> Result<Vec<Order>, StoreError> {
        self.fetch_filtered(&[
            ("user_id", &format!("eq.{user_id}")),
            ("order", "created_at.desc"),
        ])
        .await
    }

    /// Fetch orders tagged with an anonymous client id, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails or the response cannot be
    /// parsed.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn fetch_by_client(&self, client_id: &ClientId) -> Result<Vec<Order>, StoreError> {
        self.fetch_filtered(&[
            ("metadata->>clientId", &format!("eq.{client_id}")),
            ("order", "created_at.desc"),
        ])
        .await
    }

    /// Fetch a single order by id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails or the response cannot be
    /// parsed.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn fetch_by_id(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError> {
        let orders = self
            .fetch_filtered(&[("id", &format!("eq.{order_id}"))])
            .await?;
        Ok(orders.into_iter().next())
    }

    /// Fetch everything visible to the given identity.
    ///
    /// The user-id and client-id queries run concurrently and are merged
    /// into one set keyed by order id. An identity with neither field
    /// populated yields an empty set, not an error - the caller retries
    /// once identity is available.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` only when every issued query failed; a single
    /// failure is reported through [`VisibleOrders::partial_error`].
    #[instrument(skip(self, identity))]
    pub async fn fetch_visible(
        &self,
        identity: &TrackingIdentity,
    ) -> Result<VisibleOrders, StoreError> {
        if identity.is_empty() {
            tracing::debug!("Identity not initialized yet, returning empty order set");
            return Ok(VisibleOrders {
                orders: Vec::new(),
                partial_error: None,
            });
        }

        let by_user = async {
            match &identity.user_id {
                Some(user_id) => Some(self.fetch_by_user(user_id).await),
                None => None,
            }
        };
        let by_client = async {
            match &identity.client_id {
                Some(client_id) => Some(self.fetch_by_client(client_id).await),
                None => None,
            }
        };
        let (by_user, by_client) = tokio::join!(by_user, by_client);

        let mut lists = Vec::new();
        let mut first_error = None;
        for result in [by_user, by_client].into_iter().flatten() {
            match result {
                Ok(orders) => lists.push(orders),
                Err(e) => {
                    tracing::warn!(error = %e, "One visibility query failed, merging the rest");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if lists.is_empty()
            && let Some(e) = first_error
        {
            return Err(e);
        }

        Ok(VisibleOrders {
            orders: merge_order_lists(lists),
            partial_error: first_error,
        })
    }

    /// Transition an order's status through the metadata-preserving write
    /// boundary.
    ///
    /// Shorthand for [`OrderStoreClient::update_order`] with no metadata
    /// changes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the order does not exist,
    /// `StoreError::MetadataLoss` if the store dropped the metadata, or
    /// other `StoreError` variants for transport failures.
    #[instrument(skip(self), fields(order_id = %order_id, status = %status))]
    pub async fn update_status(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        self.update_order(order_id, status, &OrderMetadata::default())
            .await
    }

    /// Transition an order's status and merge metadata changes in.
    ///
    /// This is a read-modify-write: the current row is fetched, the status
    /// is written into both storage slots, and the patched `metadata` is
    /// [`OrderMetadata::merged_preserving`] of the current bag with
    /// `changes` - incoming keys win, an established `clientId` can never
    /// be cleared. The returned row is checked for metadata loss before
    /// being treated as success.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the order does not exist,
    /// `StoreError::MetadataLoss` if the store dropped the metadata, or
    /// other `StoreError` variants for transport failures.
    #[instrument(skip(self, changes), fields(order_id = %order_id, status = %status))]
    pub async fn update_order(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
        changes: &OrderMetadata,
    ) -> Result<Order, StoreError> {
        let current = self
            .fetch_by_id(order_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(order_id.clone()))?;

        let patch = status_patch(&current, status, changes);

        let response = self
            .inner
            .client
            .patch(&self.inner.endpoint)
            .query(&[("id", format!("eq.{order_id}"))])
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;

        let body = Self::read_success_body(response).await?;
        let mut updated: Vec<Order> = serde_json::from_str(&body)
            .map_err(|e| StoreError::Parse(format!("Failed to parse updated order: {e}")))?;
        let updated = updated
            .pop()
            .ok_or_else(|| StoreError::NotFound(order_id.clone()))?;

        if current.metadata.client_id.is_some() && updated.metadata.client_id.is_none() {
            tracing::error!(order_id = %order_id, "Store dropped clientId on status update");
            return Err(StoreError::MetadataLoss(order_id.clone()));
        }

        Ok(updated)
    }

    /// Execute one filtered GET against the orders table.
    async fn fetch_filtered(&self, query: &[(&str, &str)]) -> Result<Vec<Order>, StoreError> {
        let response = self
            .inner
            .client
            .get(&self.inner.endpoint)
            .query(query)
            .send()
            .await?;

        let body = Self::read_success_body(response).await?;
        let orders: Vec<Order> = serde_json::from_str(&body)
            .map_err(|e| StoreError::Parse(format!("Failed to parse orders: {e}")))?;

        for order in &orders {
            if order.status_slots_diverged() {
                tracing::warn!(
                    order_id = %order.id,
                    status = %order.status,
                    order_status = %order.order_status,
                    "Order status slots diverged in store"
                );
            }
        }

        Ok(orders)
    }

    /// Extract the body of a successful response, mapping error statuses.
    async fn read_success_body(response: reqwest::Response) -> Result<String, StoreError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(StoreError::RateLimited(retry_after));
        }

        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "Store returned non-success status"
            );
            return Err(StoreError::Status { status, body });
        }

        Ok(body)
    }
}

/// Merge result lists into one set keyed by order id.
///
/// An order present in more than one list appears once; when versions
/// differ, the one with the newer `updated_at` is kept. The merged set is
/// sorted by `created_at` descending.
#[must_use]
pub fn merge_order_lists(lists: Vec<Vec<Order>>) -> Vec<Order> {
    let mut by_id: HashMap<OrderId, Order> = HashMap::new();
    for order in lists.into_iter().flatten() {
        match by_id.get(&order.id) {
            Some(known) if !order.is_newer_than(known) => {}
            _ => {
                by_id.insert(order.id.clone(), order);
            }
        }
    }

    let mut merged: Vec<Order> = by_id.into_values().collect();
    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    merged
}

/// Build the PATCH body for a status transition.
///
/// Both status slots are written together, and the metadata sent is the
/// preserving merge of the order's current bag with the changes, so no
/// update through this path can clear an established `clientId`.
#[must_use]
fn status_patch(current: &Order, status: OrderStatus, changes: &OrderMetadata) -> serde_json::Value {
    serde_json::json!({
        "status": status,
        "order_status": status,
        "metadata": current.metadata.merged_preserving(changes),
        "updated_at": chrono::Utc::now(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, minute, 0)
            .single()
            .unwrap()
    }

    fn order(id: &str, created_minute: u32, updated_minute: u32) -> Order {
        Order {
            id: OrderId::new(id),
            order_number: format!("FD-{id}"),
            status: OrderStatus::Confirmed,
            order_status: OrderStatus::Confirmed,
            user_id: Some(UserId::new("u1")),
            metadata: OrderMetadata::with_client_id(ClientId::new("c1")),
            created_at: ts(created_minute),
            updated_at: ts(updated_minute),
        }
    }

    #[test]
    fn test_merge_deduplicates_by_id() {
        // The same order visible through both predicates appears once.
        let merged = merge_order_lists(vec![
            vec![order("o1", 0, 1), order("o2", 5, 5)],
            vec![order("o1", 0, 1)],
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_keeps_newer_version() {
        let mut newer = order("o1", 0, 9);
        newer.set_status(OrderStatus::Ready);

        let merged = merge_order_lists(vec![vec![order("o1", 0, 1)], vec![newer]]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.first().unwrap().status, OrderStatus::Ready);
    }

    #[test]
    fn test_merge_sorts_created_at_desc() {
        let merged = merge_order_lists(vec![
            vec![order("o-old", 1, 1)],
            vec![order("o-new", 30, 30)],
        ]);
        assert_eq!(merged.first().unwrap().id.as_str(), "o-new");
    }

    #[test]
    fn test_merge_empty_input() {
        assert!(merge_order_lists(Vec::new()).is_empty());
    }

    #[test]
    fn test_status_patch_writes_both_slots_and_keeps_metadata() {
        let current = order("o1", 0, 1);
        let patch = status_patch(&current, OrderStatus::Ready, &OrderMetadata::default());

        assert_eq!(patch.get("status").unwrap(), "ready");
        assert_eq!(patch.get("order_status").unwrap(), "ready");
        assert_eq!(
            patch.pointer("/metadata/clientId").unwrap(),
            &serde_json::json!("c1")
        );
    }

    #[test]
    fn test_status_patch_never_sends_empty_metadata_for_tagged_order() {
        let current = order("o1", 0, 1);
        let patch = status_patch(&current, OrderStatus::Cancelled, &OrderMetadata::default());
        let metadata = patch.get("metadata").unwrap();
        assert!(metadata.get("clientId").is_some());
    }

    #[test]
    fn test_status_patch_merges_changes_without_clearing_client_id() {
        // Incoming metadata changes carry no clientId of their own; the
        // patched bag must keep the established one alongside the changes.
        let current = order("o1", 0, 1);
        let mut changes = OrderMetadata::default();
        changes
            .extra
            .insert("note".to_owned(), serde_json::json!("ring bell"));

        let patch = status_patch(&current, OrderStatus::Ready, &changes);

        assert_eq!(
            patch.pointer("/metadata/clientId").unwrap(),
            &serde_json::json!("c1")
        );
        assert_eq!(
            patch.pointer("/metadata/note").unwrap(),
            &serde_json::json!("ring bell")
        );
    }
}

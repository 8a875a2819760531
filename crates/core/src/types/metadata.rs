//! Typed order metadata bag.
//!
//! The platform stores `metadata` as an open JSON object. The one field
//! this codebase depends on is `clientId`, which attributes anonymous
//! orders to a device. Everything else rides along untouched in `extra`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ClientId;

/// Order metadata with one required concern (`clientId`) and an escape
/// hatch for whatever else the ordering flow stashed in there.
///
/// An order's `clientId` must never be dropped on update: once lost, the
/// order is permanently invisible to its anonymous owner. Use
/// [`OrderMetadata::merged_preserving`] at every write boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderMetadata {
    /// Anonymous device attribution token.
    #[serde(rename = "clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,

    /// Remaining metadata keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl OrderMetadata {
    /// Metadata carrying only a client id.
    #[must_use]
    pub fn with_client_id(client_id: ClientId) -> Self {
        Self {
            client_id: Some(client_id),
            extra: BTreeMap::new(),
        }
    }

    /// True when there is nothing in the bag at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.client_id.is_none() && self.extra.is_empty()
    }

    /// Merge `incoming` over `self` without ever clearing an established
    /// `clientId`.
    ///
    /// Incoming keys win for `extra`; an incoming `clientId` of `None`
    /// keeps the existing value. This is the invariant that broken write
    /// paths used to violate by overwriting `metadata` with `{}`.
    #[must_use]
    pub fn merged_preserving(&self, incoming: &Self) -> Self {
        let mut extra = self.extra.clone();
        for (key, value) in &incoming.extra {
            extra.insert(key.clone(), value.clone());
        }
        Self {
            client_id: incoming
                .client_id
                .clone()
                .or_else(|| self.client_id.clone()),
            extra,
        }
    }
}

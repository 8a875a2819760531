//! The viewer identity used to decide order visibility.

use serde::{Deserialize, Serialize};

use super::{ClientId, UserId};

/// Who is looking at the orders.
///
/// Either side may be absent: a fresh device has only a `client_id`, a
/// signed-in user on a new device may briefly have only a `user_id`, and a
/// user who authenticated on the device they ordered from has both.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackingIdentity {
    /// Authenticated identity, when a session exists.
    pub user_id: Option<UserId>,
    /// Durable pseudo-anonymous device token.
    pub client_id: Option<ClientId>,
}

impl TrackingIdentity {
    /// Identity for a device without an authenticated session.
    #[must_use]
    pub const fn anonymous(client_id: ClientId) -> Self {
        Self {
            user_id: None,
            client_id: Some(client_id),
        }
    }

    /// Identity for an authenticated session without a device token.
    #[must_use]
    pub const fn authenticated(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            client_id: None,
        }
    }

    /// Identity carrying both sides.
    #[must_use]
    pub const fn full(user_id: UserId, client_id: ClientId) -> Self {
        Self {
            user_id: Some(user_id),
            client_id: Some(client_id),
        }
    }

    /// Neither field populated yet (identity still initializing).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.client_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let anon = TrackingIdentity::anonymous(ClientId::new("c1"));
        assert!(anon.user_id.is_none());
        assert!(!anon.is_empty());

        let auth = TrackingIdentity::authenticated(UserId::new("u1"));
        assert!(auth.client_id.is_none());
        assert!(!auth.is_empty());

        let full = TrackingIdentity::full(UserId::new("u1"), ClientId::new("c1"));
        assert!(full.user_id.is_some() && full.client_id.is_some());
    }

    #[test]
    fn test_default_is_empty() {
        assert!(TrackingIdentity::default().is_empty());
    }
}

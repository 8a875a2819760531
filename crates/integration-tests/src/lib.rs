//! Integration test support for Forno d'Oro order tracking.
//!
//! The tracking crate talks to two external collaborators: the REST order
//! store and the realtime change feed. The feed side is a trait seam
//! ([`ChangeFeed`]), so these tests drive the full subscription state
//! machine and reconciliation path through [`ScriptedFeed`] without a
//! network.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p forno-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use secrecy::SecretString;
use tokio::sync::mpsc;

use forno_core::{ClientId, Order, OrderId, OrderMetadata, OrderStatus, UserId};
use forno_tracking::{ChangeEvent, ChangeFeed, FeedError, FeedMessage, FeedRequest, TrackingConfig};

/// A change feed driven by the test instead of a transport.
///
/// [`ScriptedFeed::scripted`] pairs the feed with a [`FeedScript`]; the
/// feed is handed to the subscriber while the script stays with the test
/// to inject messages and inspect the requests the feed was opened with.
pub struct ScriptedFeed {
    receiver: Mutex<Option<mpsc::Receiver<FeedMessage>>>,
    requests: Arc<Mutex<Vec<FeedRequest>>>,
    fail_connect: bool,
}

/// Test-side handle to a [`ScriptedFeed`].
///
/// Dropping the script without a [`FeedMessage::Closed`] simulates the
/// transport dying mid-stream.
pub struct FeedScript {
    sender: mpsc::Sender<FeedMessage>,
    requests: Arc<Mutex<Vec<FeedRequest>>>,
}

impl ScriptedFeed {
    /// A feed whose messages the test scripts through the returned handle.
    #[must_use]
    pub fn scripted() -> (Self, FeedScript) {
        let (tx, rx) = mpsc::channel(16);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let feed = Self {
            receiver: Mutex::new(Some(rx)),
            requests: Arc::clone(&requests),
            fail_connect: false,
        };
        let script = FeedScript {
            sender: tx,
            requests,
        };
        (feed, script)
    }

    /// A feed that refuses every open call.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            receiver: Mutex::new(None),
            requests: Arc::new(Mutex::new(Vec::new())),
            fail_connect: true,
        }
    }
}

impl FeedScript {
    /// Inject one message into the open feed.
    ///
    /// Returns false once the subscriber has released the feed (after
    /// unsubscribing or failing), which tests use to prove no more
    /// deliveries are possible.
    pub async fn send(&self, message: FeedMessage) -> bool {
        self.sender.send(message).await.is_ok()
    }

    /// Every request the feed was opened with, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<FeedRequest> {
        self.requests
            .lock()
            .map_or_else(|_| Vec::new(), |requests| requests.clone())
    }
}

impl ChangeFeed for ScriptedFeed {
    async fn open(&self, request: FeedRequest) -> Result<mpsc::Receiver<FeedMessage>, FeedError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        if self.fail_connect {
            return Err(FeedError::Connect("scripted connect failure".to_owned()));
        }

        self.receiver
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| FeedError::Connect("scripted stream already taken".to_owned()))
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A config that never touches the environment or the network.
#[must_use]
pub fn test_config() -> TrackingConfig {
    TrackingConfig {
        platform_url: "http://localhost:54321"
            .parse()
            .expect("static test url is valid"),
        anon_key: SecretString::from("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6"),
        orders_table: "orders".to_owned(),
        identity_file: PathBuf::from(".forno-test/client-id"),
        subscribe_timeout: Duration::from_secs(10),
    }
}

/// [`test_config`] pointed at a local stub server.
#[must_use]
pub fn test_config_at(base_url: &str) -> TrackingConfig {
    let mut config = test_config();
    config.platform_url = base_url.parse().expect("stub url is valid");
    config
}

/// Deterministic timestamp within one test day.
#[must_use]
pub fn ts(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, minute, 0)
        .single()
        .expect("static test timestamp is valid")
}

/// Bare order owned by no one.
#[must_use]
pub fn order(id: &str, status: OrderStatus, updated_minute: u32) -> Order {
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

/// Order owned by an authenticated user.
#[must_use]
pub fn user_order(id: &str, user: &str, status: OrderStatus, updated_minute: u32) -> Order {
    let mut o = order(id, status, updated_minute);
    o.user_id = Some(UserId::new(user));
    o
}

/// Order placed anonymously by a device.
#[must_use]
pub fn client_order(id: &str, client: &str, status: OrderStatus, updated_minute: u32) -> Order {
    let mut o = order(id, status, updated_minute);
    o.metadata = OrderMetadata::with_client_id(ClientId::new(client));
    o
}

/// Wrap an order as a feed change event for the orders table.
#[must_use]
pub fn change(record: Order) -> FeedMessage {
    FeedMessage::Change(ChangeEvent {
        table: "orders".to_owned(),
        record,
    })
}

//! `forno-cli status` - staff-side order status transition.

use std::str::FromStr;

use forno_core::{OrderId, OrderStatus};
use forno_tracking::{OrderStoreClient, TrackingConfig};

/// Transition an order through the metadata-preserving write boundary.
///
/// # Errors
///
/// Returns an error if the status string is invalid, the order does not
/// exist, or the store rejects the update.
pub async fn update(order: &str, set: &str) -> Result<(), Box<dyn std::error::Error>> {
    let status = OrderStatus::from_str(set)?;
    let config = TrackingConfig::from_env()?;
    let store = OrderStoreClient::new(&config);

    let updated = store.update_status(&OrderId::new(order), status).await?;

    println!(
        "{} is now {} (updated {})",
        updated.order_number,
        updated.status,
        updated.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

//! `forno-cli orders` - one-shot fetch of visible orders.

use forno_tracking::{OrderStoreClient, TrackingConfig};

use super::resolve_identity;

/// Fetch and print the orders visible to the current identity.
///
/// A single-sided query failure prints a warning and the best-effort data
/// from the other side; only a total failure errors out.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or every visibility
/// query failed.
pub async fn list(user: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config = TrackingConfig::from_env()?;
    let identity = resolve_identity(&config, user);
    let store = OrderStoreClient::new(&config);

    let visible = store.fetch_visible(&identity).await?;

    if let Some(e) = &visible.partial_error {
        println!("warning: some orders may be missing ({e})");
    }

    if visible.orders.is_empty() {
        println!("No orders visible for this identity.");
        return Ok(());
    }

    println!("{:<12} {:<18} {:<20}", "ORDER", "STATUS", "UPDATED");
    for order in &visible.orders {
        println!(
            "{:<12} {:<18} {:<20}",
            order.order_number,
            order.status.to_string(),
            order.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

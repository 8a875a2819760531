//! `forno-cli track` - live order tracking until Ctrl+C.

use forno_tracking::{
    HttpChangeFeed, OrderStoreClient, OrderSubscriber, OrderTracker, SubscriptionState,
    TrackingConfig,
};

use super::resolve_identity;

/// Watch orders live, printing each applied update.
///
/// Transient subscription loss never crashes the command: the last known
/// data stays on screen and a staleness warning is printed instead.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or the subscription
/// never goes live in the first place.
pub async fn live(user: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config = TrackingConfig::from_env()?;
    let identity = resolve_identity(&config, user);

    let tracker = OrderTracker::new(
        OrderStoreClient::new(&config),
        OrderSubscriber::new(HttpChangeFeed::new(&config), &config),
        identity,
    );

    let handle = tracker
        .watch(|order| {
            println!(
                "{}  {}  ->  {}",
                order.updated_at.format("%H:%M:%S"),
                order.order_number,
                order.status
            );
        })
        .await?;

    // Show the authoritative state the watch call fetched
    for order in tracker.orders() {
        println!(
            "{}  {}  ->  {}",
            order.updated_at.format("%H:%M:%S"),
            order.order_number,
            order.status
        );
    }
    println!("Tracking live updates, Ctrl+C to stop...");

    let mut states = handle.state_changes();
    tokio::select! {
        () = shutdown_signal() => {
            handle.unsubscribe();
            println!("Stopped.");
        }
        _ = states.wait_for(|state| state.is_final()) => {
            if handle.state() == SubscriptionState::Error {
                println!(
                    "warning: live updates interrupted; shown data may be stale. Re-run to resume."
                );
            }
        }
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

//! CLI command implementations.

pub mod identity;
pub mod orders;
pub mod status;
pub mod track;

use forno_core::TrackingIdentity;
use forno_tracking::{ClientIdentityProvider, FileIdentityStore, TrackingConfig};

/// Resolve the viewer identity: the durable device client id plus the
/// optional authenticated user id passed on the command line.
fn resolve_identity(config: &TrackingConfig, user: Option<&str>) -> TrackingIdentity {
    let provider = ClientIdentityProvider::new(FileIdentityStore::new(&config.identity_file));
    let client_id = provider.client_id();

    user.map_or_else(
        || TrackingIdentity::anonymous(client_id.clone()),
        |user_id| TrackingIdentity::full(user_id.into(), client_id.clone()),
    )
}

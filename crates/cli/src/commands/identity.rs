//! `forno-cli identity` - print the durable device client id.

use forno_tracking::{ClientIdentityProvider, FileIdentityStore, TrackingConfig};

/// Print the device client id, creating it on first use.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded. Identity storage
/// failures do not error; the provider degrades to a volatile token.
pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = TrackingConfig::from_env()?;
    let provider = ClientIdentityProvider::new(FileIdentityStore::new(&config.identity_file));

    println!("{}", provider.client_id());
    Ok(())
}

//! Durable pseudo-anonymous device identity.
//!
//! Anonymous orders are attributed to a device through a random token
//! stored in `metadata.clientId` at order creation. The token is generated
//! once per device and never regenerated afterwards - regenerating it
//! would orphan every order the device placed before.
//!
//! Storage is pluggable through [`IdentityStore`]. When storage is
//! unavailable the provider degrades to a volatile in-memory token for the
//! lifetime of the process: orders placed in that mode are not recoverable
//! across restarts, which is accepted degradation rather than an error.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use thiserror::Error;
use uuid::Uuid;

use forno_core::ClientId;

/// Errors from the underlying identity storage.
#[derive(Debug, Error)]
pub enum IdentityStoreError {
    /// Reading or writing the token failed.
    #[error("Identity storage I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Durable key-value storage for the device identity token.
///
/// No transactional guarantees are needed; the token is written once and
/// read forever after.
pub trait IdentityStore: Send + Sync {
    /// Load the persisted token, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `IdentityStoreError` if the storage cannot be read.
    fn load(&self) -> Result<Option<String>, IdentityStoreError>;

    /// Persist the token.
    ///
    /// # Errors
    ///
    /// Returns `IdentityStoreError` if the storage cannot be written.
    fn persist(&self, token: &str) -> Result<(), IdentityStoreError>;
}

/// Identity store backed by a single token file.
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    /// Create a store for the given token file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The token file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<String>, IdentityStoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                if token.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(token.to_owned()))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IdentityStoreError::Io(e)),
        }
    }

    fn persist(&self, token: &str) -> Result<(), IdentityStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)?;
        Ok(())
    }
}

/// Volatile in-memory identity store, used in tests.
#[derive(Default)]
pub struct MemoryIdentityStore {
    token: Mutex<Option<String>>,
}

impl MemoryIdentityStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a token.
    #[must_use]
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_owned())),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<String>, IdentityStoreError> {
        Ok(self
            .token
            .lock()
            .map_or(None, |guard| guard.clone()))
    }

    fn persist(&self, token: &str) -> Result<(), IdentityStoreError> {
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token.to_owned());
        }
        Ok(())
    }
}

/// Provides the device's client identity, creating it on first use.
///
/// The resolved [`ClientId`] is cached for the lifetime of the provider,
/// so repeated calls always return the same value even when storage
/// misbehaves between calls.
pub struct ClientIdentityProvider<S: IdentityStore> {
    store: S,
    cached: OnceLock<ClientId>,
}

impl<S: IdentityStore> ClientIdentityProvider<S> {
    /// Create a provider over the given storage.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self {
            store,
            cached: OnceLock::new(),
        }
    }

    /// Get the device's client id, generating and persisting one on first
    /// call.
    ///
    /// Never fails: storage errors degrade to a volatile in-session token
    /// and are logged at warn level.
    pub fn client_id(&self) -> ClientId {
        self.cached
            .get_or_init(|| {
                match self.store.load() {
                    Ok(Some(token)) => return ClientId::new(token),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Identity storage unreadable, using volatile client id");
                        return Self::generate();
                    }
                }

                let fresh = Self::generate();
                if let Err(e) = self.store.persist(fresh.as_str()) {
                    tracing::warn!(
                        error = %e,
                        "Failed to persist client id, anonymous orders will not survive restart"
                    );
                }
                fresh
            })
            .clone()
    }

    fn generate() -> ClientId {
        ClientId::new(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Store whose reads and writes always fail, for degraded-mode tests.
    struct BrokenStore;

    impl IdentityStore for BrokenStore {
        fn load(&self) -> Result<Option<String>, IdentityStoreError> {
            Err(IdentityStoreError::Io(io::Error::other("disk on fire")))
        }

        fn persist(&self, _token: &str) -> Result<(), IdentityStoreError> {
            Err(IdentityStoreError::Io(io::Error::other("disk on fire")))
        }
    }

    fn temp_token_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("forno-identity-test-{}-{name}", Uuid::new_v4()))
            .join("client-id")
    }

    #[test]
    fn test_returns_persisted_token_unchanged() {
        let store = MemoryIdentityStore::with_token("c-existing");
        let provider = ClientIdentityProvider::new(store);
        assert_eq!(provider.client_id(), ClientId::new("c-existing"));
        assert_eq!(provider.client_id(), ClientId::new("c-existing"));
    }

    #[test]
    fn test_generates_and_persists_on_first_call() {
        let store = MemoryIdentityStore::new();
        let provider = ClientIdentityProvider::new(store);
        let id = provider.client_id();
        assert!(!id.as_str().is_empty());
        assert_eq!(provider.store.load().unwrap(), Some(id.as_str().to_owned()));
        // Stable across calls
        assert_eq!(provider.client_id(), id);
    }

    #[test]
    fn test_degrades_to_volatile_on_storage_failure() {
        let provider = ClientIdentityProvider::new(BrokenStore);
        let first = provider.client_id();
        // Still stable within the session despite broken storage
        assert_eq!(provider.client_id(), first);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let path = temp_token_path("roundtrip");
        let store = FileIdentityStore::new(&path);
        assert!(store.load().unwrap().is_none());

        store.persist("c-file-token").unwrap();
        assert_eq!(store.load().unwrap(), Some("c-file-token".to_owned()));

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_file_store_survives_provider_restart() {
        let path = temp_token_path("restart");

        let first = ClientIdentityProvider::new(FileIdentityStore::new(&path)).client_id();
        let second = ClientIdentityProvider::new(FileIdentityStore::new(&path)).client_id();
        assert_eq!(first, second);

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_file_store_treats_blank_file_as_absent() {
        let path = temp_token_path("blank");
        let store = FileIdentityStore::new(&path);
        store.persist("").unwrap();
        assert!(store.load().unwrap().is_none());

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}

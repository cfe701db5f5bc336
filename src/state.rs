//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::crypto::{CipherError, StreamCipher};
use crate::error::StorageError;
use crate::storage::ObjectStore;
use crate::transfer::TransferService;
use crate::uid::{self, UidTracker};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to load symmetric key: {0}")]
    Cipher(#[from] CipherError),

    #[error("Failed to list existing objects: {0}")]
    Storage(#[from] StorageError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    uids: UidTracker,
    transfer: TransferService,
}

impl AppState {
    /// Build the state from configuration.
    ///
    /// Loads the key and rehydrates the UID tracker from the bucket listing.
    pub async fn initialize(config: Config, store: Arc<dyn ObjectStore>) -> Result<Self, StateError> {
        let cipher = StreamCipher::from_hex(&config.cipher.key_hex)?
            .with_chunk_size(config.transfer.chunk_size);
        tracing::info!(key_bits = cipher.key_bits(), "Symmetric key loaded");

        let uids = uid::rehydrate(store.as_ref()).await?;

        Ok(Self::new(config, store, cipher, uids))
    }

    /// Create a new application state from prepared parts
    pub fn new(
        config: Config,
        store: Arc<dyn ObjectStore>,
        cipher: StreamCipher,
        uids: UidTracker,
    ) -> Self {
        let transfer = TransferService::new(cipher, store, config.transfer.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                uids,
                transfer,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the UID tracker
    pub fn uids(&self) -> &UidTracker {
        &self.inner.uids
    }

    /// Get the transfer service
    pub fn transfer(&self) -> &TransferService {
        &self.inner.transfer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::collections::HashMap;

    const TEST_KEY: &str = "6368616e676520746869732070617373776f726420746f206120736563726574";

    fn config(key_hex: &str) -> Config {
        let mut config = Config::default();
        config.cipher.key_hex = key_hex.to_string();
        config
    }

    #[tokio::test]
    async fn test_initialize_rehydrates_uids() {
        let store = MemoryStore::new();
        store.insert_raw("17", vec![0; 16], HashMap::new());
        store.insert_raw("readme.txt", vec![], HashMap::new());

        let state = AppState::initialize(config(TEST_KEY), Arc::new(store))
            .await
            .unwrap();

        assert!(state.uids().contains(17));
        assert_eq!(state.uids().len(), 1);
        assert_eq!(state.config().storage.bucket, "challenge-taurus");
    }

    #[tokio::test]
    async fn test_initialize_rejects_bad_key() {
        let result = AppState::initialize(config("abcd"), Arc::new(MemoryStore::new())).await;
        assert!(matches!(result, Err(StateError::Cipher(_))));

        let result = AppState::initialize(config("not hex"), Arc::new(MemoryStore::new())).await;
        assert!(matches!(result, Err(StateError::Cipher(_))));
    }
}

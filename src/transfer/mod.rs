//! Streaming transfer between HTTP requests and storage
//!
//! Uploads run as a three-stage pipeline (demultiplex, encrypt, store) joined
//! by bounded connectors. Fetches are a single pull through the cipher.

mod connector;
mod fetch;
mod upload;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Multipart;

pub use connector::{connector, ConnectorReader, ConnectorWriter};
pub use fetch::FetchedObject;
pub use upload::{sanitize_filename, stored_object_size, upload_deadline, UploadReceipt};

use crate::config::TransferConfig;
use crate::crypto::{CipherError, StreamCipher};
use crate::error::StorageError;
use crate::storage::ObjectStore;

/// Transfer errors
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Multipart body contains no parts")]
    EmptyBody,

    #[error("Error parsing multipart stream: {0}")]
    Multipart(String),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Filename not found in metadata of object {0}")]
    MissingFilename(u64),

    #[error("Upload of {uid} did not finish within {after:?}")]
    Timeout { uid: u64, after: Duration },

    #[error("Pipeline peer disconnected: {0}")]
    Disconnected(&'static str),

    #[error("Pipeline stage failed: {0}")]
    Stage(String),
}

impl TransferError {
    /// True when the error only reports that another stage went away
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransferError::Disconnected(_))
    }
}

/// Moves objects between clients and storage through the cipher
#[derive(Clone)]
pub struct TransferService {
    cipher: StreamCipher,
    store: Arc<dyn ObjectStore>,
    settings: TransferConfig,
}

impl TransferService {
    pub fn new(cipher: StreamCipher, store: Arc<dyn ObjectStore>, settings: TransferConfig) -> Self {
        Self {
            cipher,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &TransferConfig {
        &self.settings
    }

    /// Encrypt a multipart body and store it under `uid`.
    ///
    /// `declared_size` must match the plaintext length exactly; the store
    /// rejects the object otherwise.
    pub async fn upload(
        &self,
        uid: u64,
        declared_size: u64,
        multipart: Multipart,
    ) -> Result<UploadReceipt, TransferError> {
        upload::run(
            self.cipher.clone(),
            Arc::clone(&self.store),
            &self.settings,
            multipart,
            uid,
            declared_size,
        )
        .await
    }

    /// Open the object stored under `uid` for decrypted reading
    pub async fn fetch(&self, uid: u64) -> Result<FetchedObject, TransferError> {
        fetch::open(&self.cipher, self.store.as_ref(), uid).await
    }
}

//! Storage module for S3-compatible backends
//!
//! Supports MinIO, Cloudflare R2, Backblaze B2, and AWS S3, plus an in-memory
//! store for development.

mod memory;
mod s3_client;
mod types;

use std::sync::Arc;

pub use memory::MemoryStore;
pub use s3_client::S3Client;
pub use types::*;

use crate::config::{StorageConfig, StorageProvider};
use crate::error::StorageError;

/// Build the configured storage backend
pub async fn connect(
    config: &StorageConfig,
    chunk_size: usize,
) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match config.provider {
        StorageProvider::Memory => {
            tracing::warn!("Using in-memory storage, objects are lost on shutdown");
            Ok(Arc::new(MemoryStore::new()))
        }
        _ => Ok(Arc::new(S3Client::new(config, chunk_size).await?)),
    }
}

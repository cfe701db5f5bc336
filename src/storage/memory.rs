//! In-process object store
//!
//! Used for local development (`S3_PROVIDER=memory`) and tests. Objects are
//! buffered whole, so it is not meant for large payloads.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::AsyncReadExt;

use crate::error::StorageError;

use super::types::{ObjectMetadata, ObjectStore, PutBody, StoredObject, OBJECT_CONTENT_TYPE};

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    content_type: String,
    metadata: HashMap<String, String>,
}

/// Object store backed by a shared map
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<HashMap<String, MemoryObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under `key`, bypassing encryption
    pub fn insert_raw(&self, key: &str, data: Vec<u8>, metadata: HashMap<String, String>) {
        self.objects.write().insert(
            key.to_string(),
            MemoryObject {
                data: Bytes::from(data),
                content_type: OBJECT_CONTENT_TYPE.to_string(),
                metadata,
            },
        );
    }

    /// Raw stored bytes of an object
    pub fn object_bytes(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).map(|o| o.data.clone())
    }

    /// User metadata of an object
    pub fn object_metadata(&self, key: &str) -> Option<HashMap<String, String>> {
        self.objects.read().get(key).map(|o| o.metadata.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        key: &str,
        mut body: PutBody,
        length: u64,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let mut data = Vec::new();
        body.read_to_end(&mut data).await?;

        if data.len() as u64 != length {
            return Err(StorageError::LengthMismatch {
                key: key.to_string(),
                expected: length,
                actual: data.len() as u64,
            });
        }

        tracing::debug!(key = %key, size = data.len(), "Stored object in memory");

        self.objects.write().insert(
            key.to_string(),
            MemoryObject {
                data: Bytes::from(data),
                content_type: content_type.to_string(),
                metadata,
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<StoredObject, StorageError> {
        let object = self
            .objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;

        Ok(StoredObject {
            metadata: ObjectMetadata {
                key: key.to_string(),
                size: object.data.len() as i64,
                content_type: Some(object.content_type),
                user_metadata: object.metadata,
            },
            body: Box::pin(Cursor::new(object.data)),
        })
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

//! Storage types

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::StorageError;

/// User metadata entry carrying the uploaded file's original name
pub const FILENAME_METADATA_KEY: &str = "Filename";

/// Content type of every stored object
pub const OBJECT_CONTENT_TYPE: &str = "application/octet-stream";

/// Source stream handed to a put. `Sync` is required by the S3 body type.
pub type PutBody = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// Readable body of a fetched object
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// Metadata about a storage object
#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
}

impl ObjectMetadata {
    /// Look up a user metadata value.
    ///
    /// S3 lowercases metadata names, so the lookup ignores case.
    pub fn user_value(&self, name: &str) -> Option<&str> {
        self.user_metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Original filename recorded at upload time
    pub fn filename(&self) -> Option<&str> {
        self.user_value(FILENAME_METADATA_KEY)
    }
}

/// A fetched object: metadata plus a stream over its body
pub struct StoredObject {
    pub metadata: ObjectMetadata,
    pub body: ObjectBody,
}

/// List of object keys with optional continuation token
#[derive(Debug, Clone)]
pub struct ObjectList {
    pub keys: Vec<String>,
    pub continuation_token: Option<String>,
    pub is_truncated: bool,
}

/// Options for listing objects
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub max_keys: Option<i32>,
    pub continuation_token: Option<String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn with_continuation_token(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = Some(token.into());
        self
    }
}

/// Object storage backend.
///
/// Callers bound long-running calls with `tokio::time::timeout`; dropping the
/// returned future cancels the operation.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `length` bytes read from `body` under `key`.
    ///
    /// The body must yield exactly `length` bytes.
    async fn put_object(
        &self,
        key: &str,
        body: PutBody,
        length: u64,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError>;

    /// Open an object for streaming reads
    async fn get_object(&self, key: &str) -> Result<StoredObject, StorageError>;

    /// List every key in the bucket
    async fn list_keys(&self) -> Result<Vec<String>, StorageError>;
}

//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    Client,
};
use futures::TryStreamExt;
use http_body::Frame;
use http_body_util::StreamBody;
use tokio_util::io::ReaderStream;

use crate::config::StorageConfig;
use crate::error::StorageError;

use super::types::{
    ListOptions, ObjectList, ObjectMetadata, ObjectStore, PutBody, StoredObject,
};

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
    chunk_size: usize,
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub async fn new(config: &StorageConfig, chunk_size: usize) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "vault-server",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Test connection by checking if bucket exists
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    DisplayErrorContext(&e)
                );
            }
        }

        Ok(Self {
            client,
            bucket,
            chunk_size,
        })
    }

    /// List one page of objects in the bucket
    pub async fn list_objects(&self, options: ListOptions) -> Result<ObjectList, StorageError> {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);

        if let Some(max_keys) = options.max_keys {
            request = request.max_keys(max_keys);
        }

        if let Some(token) = options.continuation_token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify("Failed to list objects", &self.bucket, e))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(|k| k.to_string()))
            .collect();

        Ok(ObjectList {
            keys,
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }
}

/// Map an SDK failure onto the storage error taxonomy
fn classify<E, R>(context: &str, bucket: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = format!("{}: {}", context, DisplayErrorContext(&err));

    if matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)) {
        return StorageError::ConnectionFailed(message);
    }

    match err.code() {
        Some("NoSuchBucket") => StorageError::BucketNotFound(bucket.to_string()),
        Some("AccessDenied") => StorageError::AccessDenied(message),
        _ => StorageError::SdkError(message),
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn put_object(
        &self,
        key: &str,
        body: PutBody,
        length: u64,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let content_length = i64::try_from(length).map_err(|_| {
            StorageError::SdkError(format!("Object {} too large: {} bytes", key, length))
        })?;

        // Stream the body through with a known length so the SDK never buffers it
        let frames = ReaderStream::with_capacity(body, self.chunk_size).map_ok(Frame::data);
        let body = ByteStream::from_body_1_x(StreamBody::new(frames));

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_length(content_length)
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| classify(&format!("Failed to put object {}", key), &self.bucket, e))?;

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<StoredObject, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if not_found || e.to_string().contains("404") {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    classify(&format!("Failed to get object {}", key), &self.bucket, e)
                }
            })?;

        let metadata = ObjectMetadata {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0),
            content_type: response.content_type().map(|s| s.to_string()),
            user_metadata: response.metadata().cloned().unwrap_or_default(),
        };

        Ok(StoredObject {
            metadata,
            body: Box::pin(response.body.into_async_read()),
        })
    }

    /// List all keys in the bucket (handles pagination)
    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut all_keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut options = ListOptions::new().with_max_keys(1000);

            if let Some(token) = continuation_token.take() {
                options = options.with_continuation_token(token);
            }

            let result = self.list_objects(options).await?;
            all_keys.extend(result.keys);

            if !result.is_truncated {
                break;
            }

            continuation_token = result.continuation_token;
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(all_keys)
    }
}

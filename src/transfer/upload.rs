//! Upload pipeline
//!
//! Three concurrent stages per request:
//! 1. Demultiplex: copy every multipart field into the `plain` connector and
//!    publish the first field's filename on a one-shot handoff
//! 2. Encrypt: stream `plain` through the cipher into the `sealed` connector
//! 3. Store: wait for the filename, then write `sealed` to storage with an
//!    exact length under a size-derived deadline

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Multipart;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::TransferConfig;
use crate::crypto::{CipherError, StreamCipher, IV_SIZE};
use crate::storage::{ObjectStore, FILENAME_METADATA_KEY, OBJECT_CONTENT_TYPE};

use super::connector::{connector, ConnectorReader, ConnectorWriter};
use super::TransferError;

const STAGE_GRACE: Duration = Duration::from_millis(100);

/// Outcome of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub uid: u64,
    pub filename: Option<String>,
    /// Plaintext bytes received
    pub size: u64,
    /// Bytes written to storage (IV included)
    pub stored_size: u64,
}

/// Size of the stored object for a declared plaintext size
pub fn stored_object_size(declared_size: u64) -> Option<u64> {
    declared_size.checked_add(IV_SIZE as u64)
}

/// Deadline for writing `bytes` to storage.
///
/// Assumes the backend never runs slower than `min_throughput` bytes per
/// second, plus a fixed margin for request setup.
pub fn upload_deadline(bytes: u64, min_throughput: u64, safety_margin: Duration) -> Duration {
    let seconds = bytes.div_ceil(min_throughput.max(1));
    safety_margin.saturating_add(Duration::from_secs(seconds))
}

/// Reduce an uploaded filename to its base name
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match base {
        "." | ".." => String::new(),
        name => name.to_string(),
    }
}

/// Run the three upload stages and join them.
pub(super) async fn run(
    cipher: StreamCipher,
    store: Arc<dyn ObjectStore>,
    settings: &TransferConfig,
    multipart: Multipart,
    uid: u64,
    declared_size: u64,
) -> Result<UploadReceipt, TransferError> {
    let stored_size = stored_object_size(declared_size).ok_or_else(|| {
        TransferError::Stage(format!("Declared size {} overflows", declared_size))
    })?;

    let (plain_tx, plain_rx) = connector(settings.connector_depth);
    let (sealed_tx, sealed_rx) = connector(settings.connector_depth);
    let (filename_tx, filename_rx) = oneshot::channel();

    let demux = tokio::spawn(demultiplex(
        multipart,
        plain_tx,
        filename_tx,
        settings.chunk_size,
    ));
    let encrypt = tokio::spawn(encrypt(cipher, plain_rx, sealed_tx));
    let deadline = upload_deadline(
        stored_size,
        settings.upload_min_throughput,
        settings.upload_safety_margin,
    );
    let store = tokio::spawn(store_object(
        store,
        uid,
        stored_size,
        deadline,
        sealed_rx,
        filename_rx,
    ));

    let stored = flatten(store.await);
    let (received, encrypted) = if stored.is_err() {
        (settle(demux).await, settle(encrypt).await)
    } else {
        (flatten(demux.await), flatten(encrypt.await))
    };

    match (received, encrypted, stored) {
        (Ok(size), Ok(encrypted_size), Ok(filename)) => {
            tracing::info!(
                uid = uid,
                size = size,
                encrypted = encrypted_size,
                stored = stored_size,
                "Upload stored"
            );
            Ok(UploadReceipt {
                uid,
                filename,
                size,
                stored_size,
            })
        }
        (received, encrypted, stored) => Err(root_cause([
            received.err(),
            encrypted.err(),
            stored.err(),
        ])),
    }
}

/// Join a producer after the store stage gave up.
///
/// Producers normally unwind on their own once the sealed connector is gone,
/// but the demultiplexer may be parked on a slow client.
async fn settle<T>(mut handle: JoinHandle<Result<T, TransferError>>) -> Result<T, TransferError> {
    match tokio::time::timeout(STAGE_GRACE, &mut handle).await {
        Ok(joined) => flatten(joined),
        Err(_) => {
            handle.abort();
            flatten(handle.await)
        }
    }
}

fn flatten<T>(
    joined: Result<Result<T, TransferError>, tokio::task::JoinError>,
) -> Result<T, TransferError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(TransferError::Disconnected("stage cancelled")),
        Err(e) => Err(TransferError::Stage(e.to_string())),
    }
}

/// Pick the error that explains the failure.
///
/// Stages are listed upstream first. An error that only reports a vanished
/// peer is a consequence of another stage failing, so it loses to any other.
fn root_cause<const N: usize>(errors: [Option<TransferError>; N]) -> TransferError {
    let mut fallback = None;
    for err in errors.into_iter().flatten() {
        if !err.is_disconnect() {
            return err;
        }
        fallback.get_or_insert(err);
    }
    fallback.unwrap_or_else(|| TransferError::Stage("pipeline failed without an error".to_string()))
}

fn stage_failed(err: &TransferError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

async fn demultiplex(
    mut multipart: Multipart,
    mut plain: ConnectorWriter,
    filename_tx: oneshot::Sender<String>,
    chunk_size: usize,
) -> Result<u64, TransferError> {
    match copy_parts(&mut multipart, &mut plain, filename_tx, chunk_size).await {
        Ok(size) => {
            plain.shutdown().await.ok();
            Ok(size)
        }
        Err(e) => {
            plain.close_with_error(stage_failed(&e)).await;
            Err(e)
        }
    }
}

async fn copy_parts(
    multipart: &mut Multipart,
    plain: &mut ConnectorWriter,
    filename_tx: oneshot::Sender<String>,
    chunk_size: usize,
) -> Result<u64, TransferError> {
    let mut filename_tx = Some(filename_tx);
    let mut parts = 0usize;
    let mut total = 0u64;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| TransferError::Multipart(e.body_text()))?
    {
        if let Some(tx) = filename_tx.take() {
            let filename = field.file_name().map(sanitize_filename).unwrap_or_default();
            tracing::debug!(filename = %filename, "Captured upload filename");
            // Store stage gone means the upload already failed downstream
            let _ = tx.send(filename);
        }
        parts += 1;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| TransferError::Multipart(e.body_text()))?
        {
            for piece in chunk.chunks(chunk_size.max(1)) {
                plain
                    .write_all(piece)
                    .await
                    .map_err(|_| TransferError::Disconnected("plaintext connector"))?;
            }
            total += chunk.len() as u64;
        }
    }

    if parts == 0 {
        return Err(TransferError::EmptyBody);
    }

    tracing::debug!(parts = parts, size = total, "Multipart body consumed");
    Ok(total)
}

async fn encrypt(
    cipher: StreamCipher,
    mut plain: ConnectorReader,
    mut sealed: ConnectorWriter,
) -> Result<u64, TransferError> {
    match cipher.encrypt_stream(&mut plain, &mut sealed).await {
        Ok(size) => {
            sealed.shutdown().await.ok();
            Ok(size)
        }
        Err(e) => {
            let err = match e {
                CipherError::Source(_) => TransferError::Disconnected("plaintext connector"),
                CipherError::Sink(_) => TransferError::Disconnected("ciphertext connector"),
                other => TransferError::Cipher(other),
            };
            sealed.close_with_error(stage_failed(&err)).await;
            Err(err)
        }
    }
}

async fn store_object(
    store: Arc<dyn ObjectStore>,
    uid: u64,
    stored_size: u64,
    deadline: Duration,
    sealed: ConnectorReader,
    filename_rx: oneshot::Receiver<String>,
) -> Result<Option<String>, TransferError> {
    // Metadata must be known before the write starts
    let filename = filename_rx
        .await
        .map_err(|_| TransferError::Disconnected("filename handoff"))?;

    let mut metadata = HashMap::new();
    if !filename.is_empty() {
        metadata.insert(FILENAME_METADATA_KEY.to_string(), filename.clone());
    }

    let key = uid.to_string();
    tracing::debug!(
        uid = uid,
        length = stored_size,
        deadline_secs = deadline.as_secs(),
        "Writing object to storage"
    );

    tokio::time::timeout(
        deadline,
        store.put_object(
            &key,
            Box::pin(sealed),
            stored_size,
            OBJECT_CONTENT_TYPE,
            metadata,
        ),
    )
    .await
    .map_err(|_| TransferError::Timeout {
        uid,
        after: deadline,
    })??;

    Ok((!filename.is_empty()).then_some(filename))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::MemoryStore;
    use axum::body::Body;
    use axum::extract::{FromRequest, Request};
    use axum::http::header;

    const BOUNDARY: &str = "pipeline-boundary";
    const TEST_KEY: &str = "6368616e676520746869732070617373776f726420746f206120736563726574";

    fn settings() -> TransferConfig {
        TransferConfig {
            chunk_size: 3,
            connector_depth: 1,
            ..TransferConfig::default()
        }
    }

    fn part(disposition: &str, data: &str) -> String {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\n\
             Content-Type: application/octet-stream\r\n\r\n{data}\r\n"
        )
    }

    async fn multipart(parts: &[String]) -> Multipart {
        let body = format!("{}--{BOUNDARY}--\r\n", parts.concat());
        let request = Request::builder()
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    async fn decrypt(store: &MemoryStore, uid: u64) -> Vec<u8> {
        let cipher = StreamCipher::from_hex(TEST_KEY).unwrap();
        let object = store.object_bytes(&uid.to_string()).unwrap();
        let mut plaintext = Vec::new();
        cipher
            .decrypt_stream(&object[..], &mut plaintext)
            .await
            .unwrap();
        plaintext
    }

    #[tokio::test]
    async fn test_pipeline_stores_encrypted_object() {
        let store = MemoryStore::new();
        let cipher = StreamCipher::from_hex(TEST_KEY).unwrap().with_chunk_size(4);
        let body = multipart(&[part(
            "form-data; name=\"file\"; filename=\"notes/plan.txt\"",
            "hello pipeline",
        )])
        .await;

        let receipt = run(cipher, Arc::new(store.clone()), &settings(), body, 42, 14)
            .await
            .unwrap();

        assert_eq!(receipt.filename.as_deref(), Some("plan.txt"));
        assert_eq!(receipt.size, 14);
        assert_eq!(receipt.stored_size, 30);

        let stored = store.object_bytes("42").unwrap();
        assert_eq!(stored.len(), 30);
        assert_ne!(&stored[IV_SIZE..], b"hello pipeline");
        assert_eq!(
            store.object_metadata("42").unwrap().get(FILENAME_METADATA_KEY),
            Some(&"plan.txt".to_string())
        );
        assert_eq!(decrypt(&store, 42).await, b"hello pipeline");
    }

    #[tokio::test]
    async fn test_pipeline_concatenates_parts_and_names_first() {
        let store = MemoryStore::new();
        let cipher = StreamCipher::from_hex(TEST_KEY).unwrap();
        let body = multipart(&[
            part("form-data; name=\"file\"; filename=\"first.bin\"", "abc"),
            part("form-data; name=\"extra\"; filename=\"second.bin\"", "defg"),
        ])
        .await;

        let receipt = run(cipher, Arc::new(store.clone()), &settings(), body, 7, 7)
            .await
            .unwrap();

        assert_eq!(receipt.filename.as_deref(), Some("first.bin"));
        assert_eq!(decrypt(&store, 7).await, b"abcdefg");
    }

    #[tokio::test]
    async fn test_pipeline_without_filename_omits_metadata() {
        let store = MemoryStore::new();
        let cipher = StreamCipher::from_hex(TEST_KEY).unwrap();
        let body = multipart(&[part("form-data; name=\"file\"", "xyz")]).await;

        let receipt = run(cipher, Arc::new(store.clone()), &settings(), body, 9, 3)
            .await
            .unwrap();

        assert_eq!(receipt.filename, None);
        assert!(store.object_metadata("9").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_empty_body() {
        let store = MemoryStore::new();
        let cipher = StreamCipher::from_hex(TEST_KEY).unwrap();
        let body = multipart(&[]).await;

        let err = run(cipher, Arc::new(store.clone()), &settings(), body, 1, 0)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::EmptyBody), "got {:?}", err);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_size_mismatch_fails() {
        let store = MemoryStore::new();
        let cipher = StreamCipher::from_hex(TEST_KEY).unwrap();
        let body = multipart(&[part("form-data; name=\"file\"; filename=\"a\"", "four")]).await;

        let err = run(cipher, Arc::new(store.clone()), &settings(), body, 3, 10)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::Storage(StorageError::LengthMismatch { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_upload_deadline() {
        let margin = Duration::from_secs(10);
        let mib = 1024 * 1024;

        assert_eq!(upload_deadline(0, mib, margin), Duration::from_secs(10));
        assert_eq!(upload_deadline(16, mib, margin), Duration::from_secs(11));
        assert_eq!(upload_deadline(mib, mib, margin), Duration::from_secs(11));
        assert_eq!(upload_deadline(mib + 1, mib, margin), Duration::from_secs(12));
        assert_eq!(upload_deadline(5, 0, Duration::ZERO), Duration::from_secs(5));
    }

    #[test]
    fn test_stored_object_size() {
        assert_eq!(stored_object_size(0), Some(16));
        assert_eq!(stored_object_size(100), Some(116));
        assert_eq!(stored_object_size(u64::MAX), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\photo.png"), "photo.png");
        assert_eq!(sanitize_filename("dir/"), "");
        assert_eq!(sanitize_filename(".."), "");
    }

    #[test]
    fn test_root_cause_skips_disconnects() {
        let err = root_cause([
            Some(TransferError::Disconnected("plaintext connector")),
            Some(TransferError::Disconnected("ciphertext connector")),
            Some(TransferError::Timeout {
                uid: 1,
                after: Duration::from_secs(1),
            }),
        ]);
        assert!(matches!(err, TransferError::Timeout { .. }));

        let err = root_cause([
            Some(TransferError::Multipart("bad boundary".into())),
            Some(TransferError::Disconnected("plaintext connector")),
            None,
        ]);
        assert!(matches!(err, TransferError::Multipart(_)));

        let err = root_cause([None, Some(TransferError::Disconnected("filename handoff")), None]);
        assert!(matches!(err, TransferError::Disconnected("filename handoff")));
    }
}

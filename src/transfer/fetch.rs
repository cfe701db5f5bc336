//! Fetch path: storage get, then decrypt as the response body is pulled

use crate::crypto::{DecryptReader, StreamCipher};
use crate::storage::{ObjectBody, ObjectStore};

use super::TransferError;

/// A stored object opened for decrypted reading
pub struct FetchedObject {
    pub uid: u64,
    pub filename: String,
    pub body: DecryptReader<ObjectBody>,
}

impl std::fmt::Debug for FetchedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedObject")
            .field("uid", &self.uid)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Open `uid` for reading.
///
/// The IV is consumed here, so a truncated object fails before any response
/// bytes are produced.
pub(super) async fn open(
    cipher: &StreamCipher,
    store: &dyn ObjectStore,
    uid: u64,
) -> Result<FetchedObject, TransferError> {
    let object = store.get_object(&uid.to_string()).await?;

    let filename = object
        .metadata
        .filename()
        .map(str::to_string)
        .ok_or(TransferError::MissingFilename(uid))?;

    let body = cipher.decrypt_reader(object.body).await?;

    tracing::debug!(
        uid = uid,
        filename = %filename,
        stored = object.metadata.size,
        "Object opened for fetch"
    );

    Ok(FetchedObject {
        uid,
        filename,
        body,
    })
}

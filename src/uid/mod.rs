//! UID allocation
//!
//! Every stored object is named by a `u64` UID in decimal form. The tracker
//! mirrors the bucket contents in memory so allocation never needs a storage
//! round-trip:
//! 1. At startup the bucket listing is parsed into the tracker
//! 2. Uploads either reserve a caller-suggested UID or draw a random one
//! 3. Fetches check membership before touching storage

mod tracker;

pub use tracker::{UidError, UidTracker};

use crate::error::StorageError;
use crate::storage::ObjectStore;

/// Parse an unsigned base-10 integer made of ASCII digits only.
///
/// Signs and whitespace are rejected, so `"+7"` and `" 7"` never alias `"7"`.
pub fn parse_decimal(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Parse an object key as a UID
pub fn parse_uid(key: &str) -> Option<u64> {
    parse_decimal(key)
}

/// Build a tracker from the keys currently stored in the bucket.
///
/// Keys that are not decimal UIDs are ignored.
pub async fn rehydrate(store: &dyn ObjectStore) -> Result<UidTracker, StorageError> {
    let keys = store.list_keys().await?;
    let total = keys.len();

    let uids: Vec<u64> = keys
        .iter()
        .filter_map(|key| {
            let uid = parse_uid(key);
            if uid.is_none() {
                tracing::debug!(key = %key, "Skipping object with non-UID key");
            }
            uid
        })
        .collect();

    let tracker = UidTracker::with_uids(uids);
    tracing::info!(
        objects = total,
        uids = tracker.len(),
        "UID tracker rehydrated from storage"
    );

    Ok(tracker)
}

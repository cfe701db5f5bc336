//! Upload route
//!
//! POST /upload streams a multipart body through the cipher into storage.
//!
//! Headers:
//! - `File-Size` (required): plaintext size in bytes
//! - `Uid` (optional): caller-suggested UID

use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::transfer::stored_object_size;
use crate::uid::{parse_decimal, UidError, UidTracker};

pub const FILE_SIZE_HEADER: &str = "file-size";
pub const UID_HEADER: &str = "uid";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uid: u64,
    pub filename: Option<String>,
    pub size: u64,
    pub message: String,
}

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        // Bodies are streamed, never buffered
        .layer(DefaultBodyLimit::disable())
}

/// POST /upload
///
/// Every header and the multipart framing are checked before a UID is
/// reserved, so a rejected request leaves the tracker untouched.
async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
) -> Result<Json<UploadResponse>> {
    let file_size = file_size_header(&headers)?;
    let requested_uid = uid_header(&headers)?;

    let multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;

    let uid = allocate_uid(
        state.uids(),
        requested_uid,
        state.transfer().settings().uid_generation_timeout,
    )?;

    tracing::info!(
        uid = uid,
        file_size = file_size,
        suggested = requested_uid.is_some(),
        "Upload started"
    );

    let receipt = state.transfer().upload(uid, file_size, multipart).await?;

    Ok(Json(UploadResponse {
        uid: receipt.uid,
        filename: receipt.filename,
        size: receipt.size,
        message: format!("File successfully uploaded and encrypted with UID {}", receipt.uid),
    }))
}

fn file_size_header(headers: &HeaderMap) -> Result<u64> {
    let size = headers
        .get(FILE_SIZE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_decimal)
        .ok_or_else(|| {
            AppError::InvalidHeader("File-Size in header should be the file size in bytes".to_string())
        })?;

    stored_object_size(size)
        .map(|_| size)
        .ok_or_else(|| AppError::InvalidHeader(format!("File-Size {} is too large", size)))
}

fn uid_header(headers: &HeaderMap) -> Result<Option<u64>> {
    let Some(value) = headers.get(UID_HEADER) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(parse_decimal)
        .map(Some)
        .ok_or_else(|| {
            AppError::InvalidHeader(
                "The UID provided in the header cannot be parsed as a uint64".to_string(),
            )
        })
}

/// Reserve the suggested UID, or draw random ones until one is free or the
/// generation budget runs out.
pub fn allocate_uid(
    uids: &UidTracker,
    requested: Option<u64>,
    budget: Duration,
) -> std::result::Result<u64, UidError> {
    if let Some(candidate) = requested {
        return uids.add_suggested(candidate);
    }

    let deadline = Instant::now() + budget;
    loop {
        match uids.generate_unique(deadline) {
            Err(UidError::Collision(uid)) => {
                tracing::debug!(uid = uid, "Generated UID already taken, drawing again");
            }
            result => return result,
        }
    }
}

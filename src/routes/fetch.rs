//! Fetch route
//!
//! GET /fetch?uid=<decimal> streams a stored object back in plaintext.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use futures::TryStreamExt;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::storage::OBJECT_CONTENT_TYPE;
use crate::uid::parse_uid;

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    pub uid: Option<String>,
}

/// Create the fetch router
pub fn router() -> Router<AppState> {
    Router::new().route("/fetch", get(fetch))
}

/// GET /fetch
async fn fetch(State(state): State<AppState>, Query(query): Query<FetchQuery>) -> Result<Response> {
    let raw = query
        .uid
        .ok_or_else(|| AppError::BadRequest("Missing UID".to_string()))?;
    let uid = parse_uid(&raw)
        .ok_or_else(|| AppError::BadRequest(format!("UID {:?} is not a uint64", raw)))?;

    if !state.uids().contains(uid) {
        return Err(AppError::NotFound(format!(
            "The bucket does not contain any object with UID {}",
            uid
        )));
    }

    let object = state.transfer().fetch(uid).await?;
    let disposition = content_disposition(&object.filename)?;

    tracing::info!(uid = uid, filename = %object.filename, "Streaming object");

    let chunk_size = state.transfer().settings().chunk_size;
    let stream = ReaderStream::with_capacity(object.body, chunk_size)
        .inspect_err(move |e| tracing::error!(uid = uid, "Fetch stream failed: {}", e));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, OBJECT_CONTENT_TYPE)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Build an attachment disposition for `filename`.
///
/// Names that are not plain printable ASCII get a sanitized `filename` plus an
/// RFC 5987 `filename*` carrying the exact name.
fn content_disposition(filename: &str) -> Result<HeaderValue> {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();

    let value = if fallback == filename {
        format!("attachment; filename=\"{}\"", filename)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(filename)
        )
    };

    HeaderValue::from_str(&value).map_err(|e| AppError::Internal(e.to_string()))
}

//! Error types for the Vault server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::crypto::CipherError;
use crate::transfer::TransferError;
use crate::uid::UidError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Precondition failed: {0}")]
    InvalidHeader(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("UID {requested} already used in the system, please retry with {suggested}")]
    UidConflict { requested: u64, suggested: u64 },

    #[error("UID generation timed out")]
    UidTimeout,

    #[error("Unprocessable stream: {0}")]
    UnprocessableStream(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("S3 error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Length mismatch for {key}: expected {expected} bytes, received {actual}")]
    LengthMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Stream error: {0}")]
    Stream(#[from] std::io::Error),

    #[error("S3 SDK error: {0}")]
    SdkError(String),
}

impl From<UidError> for AppError {
    fn from(err: UidError) -> Self {
        match err {
            UidError::Conflict {
                requested,
                suggested,
            } => AppError::UidConflict {
                requested,
                suggested,
            },
            UidError::Timeout => AppError::UidTimeout,
            UidError::Collision(uid) => {
                AppError::Internal(format!("UID {} drawn twice, generation not retried", uid))
            }
        }
    }
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::EmptyBody => {
                AppError::BadRequest("Multipart body contains no parts".to_string())
            }
            TransferError::Multipart(msg) => AppError::UnprocessableStream(msg),
            TransferError::Cipher(e) => AppError::Cipher(e),
            TransferError::Storage(e) => AppError::Storage(e),
            TransferError::MissingFilename(uid) => {
                AppError::Internal(format!("Filename not found in metadata of object {}", uid))
            }
            e @ (TransferError::Timeout { .. }
            | TransferError::Disconnected(_)
            | TransferError::Stage(_)) => AppError::Internal(e.to_string()),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggested_uid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut suggested_uid = None;
        let (status, error_type, message) = match &self {
            AppError::InvalidHeader(msg) => {
                tracing::debug!("Rejected request header: {}", msg);
                (StatusCode::PRECONDITION_FAILED, "precondition_failed", msg.clone())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::UidConflict { suggested, .. } => {
                suggested_uid = Some(*suggested);
                (StatusCode::CONFLICT, "uid_conflict", self.to_string())
            }
            AppError::UidTimeout => {
                tracing::warn!("UID generation timed out");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "uid_timeout",
                    self.to_string(),
                )
            }
            AppError::UnprocessableStream(msg) => {
                tracing::warn!("Unprocessable upload stream: {}", msg);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "unprocessable_stream",
                    msg.clone(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                match e {
                    StorageError::ObjectNotFound(key) => {
                        (StatusCode::NOT_FOUND, "not_found", format!("Object not found: {}", key))
                    }
                    StorageError::AccessDenied(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "storage_error",
                        "Storage access denied".to_string(),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "storage_error",
                        "Storage error".to_string(),
                    ),
                }
            }
            AppError::Cipher(e) => {
                tracing::error!("Cipher error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "cipher_error",
                    "Error during encryption or decryption".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            suggested_uid,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_errors_map_to_app_errors() {
        let conflict: AppError = UidError::Conflict {
            requested: 1,
            suggested: 42,
        }
        .into();
        assert!(matches!(
            conflict,
            AppError::UidConflict {
                requested: 1,
                suggested: 42
            }
        ));

        let timeout: AppError = UidError::Timeout.into();
        assert!(matches!(timeout, AppError::UidTimeout));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::InvalidHeader("File-Size".into()).into_response().status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            AppError::UidConflict {
                requested: 1,
                suggested: 2
            }
            .into_response()
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::UnprocessableStream("boundary".into())
                .into_response()
                .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::from(TransferError::EmptyBody).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(TransferError::MissingFilename(7))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

//! Stream encryption for stored objects
//!
//! AES in counter mode with a random IV per object.

mod cipher;

pub use cipher::{DecryptReader, StreamCipher, DEFAULT_CHUNK_SIZE, IV_SIZE};

/// Cipher errors
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("Invalid key encoding: {0}")]
    InvalidKey(String),

    #[error("Invalid AES key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    #[error("Unable to generate IV: {0}")]
    Iv(String),

    #[error("Unable to read IV: stream ended early")]
    TruncatedIv,

    #[error("Error reading input stream: {0}")]
    Source(std::io::Error),

    #[error("Error writing output stream: {0}")]
    Sink(std::io::Error),
}

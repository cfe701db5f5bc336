//! AES-CTR stream cipher
//!
//! Wire format: `IV (16 bytes) || ciphertext`. The IV is the initial 128-bit
//! big-endian counter block, so a payload of any length encrypts to exactly
//! `len + 16` bytes.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher as _};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use super::CipherError;

/// Size of the IV prefixed to every ciphertext
pub const IV_SIZE: usize = 16;

/// Default read size for stream transforms: 8MB
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Per-session keystream state
enum Keystream {
    Aes128(Aes128Ctr),
    Aes192(Aes192Ctr),
    Aes256(Aes256Ctr),
}

impl Keystream {
    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Keystream::Aes128(c) => c.apply_keystream(buf),
            Keystream::Aes192(c) => c.apply_keystream(buf),
            Keystream::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// Symmetric stream cipher shared by every transfer.
///
/// Holds only the immutable key, so clones are cheap and concurrent sessions
/// never share mutable state.
#[derive(Clone)]
pub struct StreamCipher {
    key: Arc<[u8]>,
    chunk_size: usize,
}

impl fmt::Debug for StreamCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCipher")
            .field("key_bits", &(self.key.len() * 8))
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl StreamCipher {
    /// Create a cipher from raw AES key bytes (16, 24 or 32 bytes)
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        match key.len() {
            16 | 24 | 32 => Ok(Self {
                key: Arc::from(key),
                chunk_size: DEFAULT_CHUNK_SIZE,
            }),
            n => Err(CipherError::InvalidKeyLength(n)),
        }
    }

    /// Create a cipher from a hex-encoded key.
    ///
    /// Keys derived from a passphrase must already have gone through a KDF.
    pub fn from_hex(hex_key: &str) -> Result<Self, CipherError> {
        let key = hex::decode(hex_key.trim()).map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Self::new(&key)
    }

    /// Set the read size used when transforming streams
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn key_bits(&self) -> usize {
        self.key.len() * 8
    }

    fn keystream(&self, iv: &[u8; IV_SIZE]) -> Result<Keystream, CipherError> {
        let key = &self.key[..];
        let keystream = match key.len() {
            16 => Aes128Ctr::new_from_slices(key, iv).map(Keystream::Aes128),
            24 => Aes192Ctr::new_from_slices(key, iv).map(Keystream::Aes192),
            32 => Aes256Ctr::new_from_slices(key, iv).map(Keystream::Aes256),
            n => return Err(CipherError::InvalidKeyLength(n)),
        };
        keystream.map_err(|_| CipherError::InvalidKeyLength(key.len()))
    }

    /// Encrypt everything read from `source` into `sink`.
    ///
    /// A fresh random IV is written first. Returns the number of plaintext
    /// bytes encrypted. The sink is flushed but not shut down.
    pub async fn encrypt_stream<R, W>(&self, mut source: R, mut sink: W) -> Result<u64, CipherError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut iv = [0u8; IV_SIZE];
        rand::rngs::OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|e| CipherError::Iv(e.to_string()))?;

        let mut keystream = self.keystream(&iv)?;
        sink.write_all(&iv).await.map_err(CipherError::Sink)?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            let n = source.read(&mut buf).await.map_err(CipherError::Source)?;
            if n == 0 {
                break;
            }
            keystream.apply(&mut buf[..n]);
            sink.write_all(&buf[..n]).await.map_err(CipherError::Sink)?;
            total += n as u64;
        }

        sink.flush().await.map_err(CipherError::Sink)?;
        Ok(total)
    }

    /// Read the IV from `source` and return a reader yielding plaintext
    pub async fn decrypt_reader<R>(&self, mut source: R) -> Result<DecryptReader<R>, CipherError>
    where
        R: AsyncRead + Unpin,
    {
        let mut iv = [0u8; IV_SIZE];
        source.read_exact(&mut iv).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                CipherError::TruncatedIv
            } else {
                CipherError::Source(e)
            }
        })?;

        Ok(DecryptReader {
            inner: source,
            keystream: self.keystream(&iv)?,
        })
    }

    /// Decrypt `IV || ciphertext` read from `source` into `sink`.
    ///
    /// Returns the number of plaintext bytes written.
    pub async fn decrypt_stream<R, W>(&self, source: R, mut sink: W) -> Result<u64, CipherError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = self.decrypt_reader(source).await?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf).await.map_err(CipherError::Source)?;
            if n == 0 {
                break;
            }
            sink.write_all(&buf[..n]).await.map_err(CipherError::Sink)?;
            total += n as u64;
        }

        sink.flush().await.map_err(CipherError::Sink)?;
        Ok(total)
    }
}

/// Reader that decrypts ciphertext as it is pulled from the inner reader
pub struct DecryptReader<R> {
    inner: R,
    keystream: Keystream,
}

impl<R: AsyncRead + Unpin> AsyncRead for DecryptReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let start = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.keystream.apply(&mut buf.filled_mut()[start..]);
        Poll::Ready(Ok(()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "6368616e676520746869732070617373776f726420746f206120736563726574";

    const PARAGRAPH: &str = "I never wanted it to end. I spent eight days in Paris, France. \
        My best friends, Henry and Steve, went with me. We had a beautiful hotel room in the \
        Latin Quarter, and it wasn't even expensive. We had a balcony with a wonderful view.\n\n\
        We visited many famous tourist places. My favorite was the Louvre, a well-known museum.\n";

    fn cipher() -> StreamCipher {
        StreamCipher::from_hex(TEST_KEY).unwrap()
    }

    async fn encrypt(cipher: &StreamCipher, plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        cipher.encrypt_stream(plaintext, &mut out).await.unwrap();
        out
    }

    async fn decrypt(cipher: &StreamCipher, ciphertext: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        cipher.decrypt_stream(ciphertext, &mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let cipher = cipher();
        for plaintext in ["test", "", PARAGRAPH] {
            let ciphertext = encrypt(&cipher, plaintext.as_bytes()).await;
            assert_eq!(ciphertext.len(), plaintext.len() + IV_SIZE);

            let decrypted = decrypt(&cipher, &ciphertext).await;
            assert_eq!(decrypted, plaintext.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_roundtrip_across_chunk_boundaries() {
        let cipher = cipher().with_chunk_size(7);
        let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let ciphertext = encrypt(&cipher, &plaintext).await;
        let decrypted = decrypt(&cipher.clone().with_chunk_size(4096), &ciphertext).await;

        assert_eq!(decrypted, plaintext);
    }

    #[tokio::test]
    async fn test_ciphertext_differs_from_plaintext() {
        let cipher = cipher();
        for plaintext in ["test", PARAGRAPH] {
            let ciphertext = encrypt(&cipher, plaintext.as_bytes()).await;
            assert_ne!(&ciphertext[IV_SIZE..], plaintext.as_bytes());
            assert_ne!(ciphertext.as_slice(), plaintext.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_fresh_iv_per_encryption() {
        let cipher = cipher();
        let first = encrypt(&cipher, PARAGRAPH.as_bytes()).await;
        let second = encrypt(&cipher, PARAGRAPH.as_bytes()).await;

        assert_ne!(first[..IV_SIZE], second[..IV_SIZE]);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_nist_ctr_vector() {
        // SP 800-38A F.5.1, CTR-AES128.Encrypt, first two blocks
        let cipher = StreamCipher::from_hex("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let mut object = hex::decode("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff").unwrap();
        object.extend(hex::decode("874d6191b620e3261bef6864990db6ce").unwrap());
        object.extend(hex::decode("9806f66b7970fdff8617187bb9fffdff").unwrap());

        let plaintext = decrypt(&cipher, &object).await;

        assert_eq!(
            hex::encode(plaintext),
            "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51"
        );
    }

    #[tokio::test]
    async fn test_all_key_sizes() {
        let keys: [&[u8]; 3] = [&[7u8; 16], &[7u8; 24], &[7u8; 32]];
        for key in keys {
            let cipher = StreamCipher::new(key).unwrap();
            assert_eq!(cipher.key_bits(), key.len() * 8);

            let ciphertext = encrypt(&cipher, b"sized").await;
            assert_eq!(decrypt(&cipher, &ciphertext).await, b"sized");
        }
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            StreamCipher::from_hex("not hex"),
            Err(CipherError::InvalidKey(_))
        ));
        assert!(matches!(
            StreamCipher::from_hex("00112233"),
            Err(CipherError::InvalidKeyLength(4))
        ));
        assert!(matches!(
            StreamCipher::new(&[0u8; 33]),
            Err(CipherError::InvalidKeyLength(33))
        ));
    }

    #[tokio::test]
    async fn test_truncated_iv() {
        let cipher = cipher();
        let mut out = Vec::new();

        let result = cipher.decrypt_stream(&[1u8, 2, 3][..], &mut out).await;

        assert!(matches!(result, Err(CipherError::TruncatedIv)));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_empty_payload_is_iv_only() {
        let cipher = cipher();
        let ciphertext = encrypt(&cipher, b"").await;

        assert_eq!(ciphertext.len(), IV_SIZE);
        assert!(decrypt(&cipher, &ciphertext).await.is_empty());
    }

    #[tokio::test]
    async fn test_decrypt_reader_small_reads() {
        let cipher = cipher();
        let ciphertext = encrypt(&cipher, PARAGRAPH.as_bytes()).await;

        let mut reader = cipher.decrypt_reader(ciphertext.as_slice()).await.unwrap();
        let mut plaintext = Vec::new();
        let mut buf = [0u8; 5];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            plaintext.extend_from_slice(&buf[..n]);
        }

        assert_eq!(plaintext, PARAGRAPH.as_bytes());
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", cipher());
        assert!(rendered.contains("key_bits: 256"));
        assert!(!rendered.contains("63686"));
    }
}

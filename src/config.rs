//! Configuration management for Vault Server

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::crypto::DEFAULT_CHUNK_SIZE;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub cipher: CipherConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProvider {
    Minio,
    R2,
    S3,
    B2,
    Memory,
}

impl FromStr for StorageProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minio" => Ok(StorageProvider::Minio),
            "r2" => Ok(StorageProvider::R2),
            "s3" => Ok(StorageProvider::S3),
            "b2" => Ok(StorageProvider::B2),
            "memory" => Ok(StorageProvider::Memory),
            _ => Err(()),
        }
    }
}

/// Symmetric key material, hex encoded
#[derive(Clone)]
pub struct CipherConfig {
    pub key_hex: String,
}

impl fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherConfig")
            .field("key_hex", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bytes moved per pipeline step
    pub chunk_size: usize,
    /// Chunks buffered between two pipeline stages
    pub connector_depth: usize,
    /// Budget for drawing a server-generated UID
    pub uid_generation_timeout: Duration,
    /// Slowest expected upload rate to storage, in bytes per second
    pub upload_min_throughput: u64,
    /// Fixed allowance added to every upload deadline
    pub upload_safety_margin: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            // Sized for hosts with very little RAM; 16-64MB speeds up large uploads
            chunk_size: DEFAULT_CHUNK_SIZE,
            connector_depth: 2,
            uid_generation_timeout: Duration::from_millis(15),
            upload_min_throughput: 1024 * 1024,
            upload_safety_margin: Duration::from_secs(10),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                provider: StorageProvider::Minio,
                endpoint: "http://localhost:9000".to_string(),
                bucket: "challenge-taurus".to_string(),
                access_key: "admin".to_string(),
                secret_key: "password123".to_string(),
                region: Some("us-east-1".to_string()),
            },
            cipher: CipherConfig {
                key_hex: String::new(),
            },
            transfer: TransferConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let provider = match env::var("S3_PROVIDER") {
            Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: "S3_PROVIDER",
                value,
            })?,
            Err(_) => defaults.storage.provider,
        };

        // Connection settings are only mandatory for remote backends
        let connection_var = |name: &'static str| -> Result<String, ConfigError> {
            if provider == StorageProvider::Memory {
                Ok(env::var(name).unwrap_or_default())
            } else {
                required(name)
            }
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_or("SERVER_PORT", defaults.server.port)?,
            },
            storage: StorageConfig {
                provider,
                endpoint: connection_var("S3_ENDPOINT")?,
                bucket: env::var("S3_BUCKET").unwrap_or(defaults.storage.bucket),
                access_key: connection_var("S3_ACCESS_KEY")?,
                secret_key: connection_var("S3_SECRET_KEY")?,
                region: env::var("S3_REGION").ok(),
            },
            cipher: CipherConfig {
                key_hex: required("SYM_KEY")?,
            },
            transfer: TransferConfig {
                chunk_size: positive("CHUNK_SIZE", defaults.transfer.chunk_size)?,
                connector_depth: positive("CONNECTOR_DEPTH", defaults.transfer.connector_depth)?,
                uid_generation_timeout: Duration::from_millis(parse_or(
                    "UID_GENERATION_TIMEOUT_MS",
                    defaults.transfer.uid_generation_timeout.as_millis() as u64,
                )?),
                upload_min_throughput: positive(
                    "UPLOAD_MIN_THROUGHPUT",
                    defaults.transfer.upload_min_throughput,
                )?,
                upload_safety_margin: Duration::from_secs(parse_or(
                    "UPLOAD_SAFETY_MARGIN_SECS",
                    defaults.transfer.upload_safety_margin.as_secs(),
                )?),
            },
        })
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn parse_or<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => parse_value(var, &value),
        Err(_) => Ok(default),
    }
}

fn positive<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let value = parse_or(var, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: env::var(var).unwrap_or_default(),
        });
    }
    Ok(value)
}

fn parse_value<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("minio".parse(), Ok(StorageProvider::Minio));
        assert_eq!("R2".parse(), Ok(StorageProvider::R2));
        assert_eq!("memory".parse(), Ok(StorageProvider::Memory));
        assert_eq!("ftp".parse::<StorageProvider>(), Err(()));
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<u16>("SERVER_PORT", " 8080 ").unwrap(), 8080);
        assert!(matches!(
            parse_value::<u16>("SERVER_PORT", "eighty"),
            Err(ConfigError::Invalid { var: "SERVER_PORT", .. })
        ));
    }

    #[test]
    fn test_transfer_defaults() {
        let transfer = TransferConfig::default();
        assert_eq!(transfer.chunk_size, 8 * 1024 * 1024);
        assert_eq!(transfer.uid_generation_timeout, Duration::from_millis(15));
        assert_eq!(transfer.upload_min_throughput, 1024 * 1024);
        assert_eq!(transfer.upload_safety_margin, Duration::from_secs(10));
    }

    #[test]
    fn test_cipher_config_is_redacted() {
        let config = CipherConfig {
            key_hex: "deadbeef".to_string(),
        };
        assert!(!format!("{:?}", config).contains("deadbeef"));
    }
}

//! Configuration management for the election ledger
//!
//! Loads configuration from environment variables (and a `.env` file when
//! present) with validation.

use crate::crypto::secure::MIN_PEPPER_LEN;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Security configuration for credential hashing
#[derive(Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Credential pepper (base64 encoded, minimum 32 bytes)
    pub credential_pepper: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("credential_pepper", &"<redacted>")
            .finish()
    }
}

impl SecurityConfig {
    /// Load security configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let credential_pepper = std::env::var("LEDGER_CREDENTIAL_PEPPER").map_err(|_| {
            Error::configuration("LEDGER_CREDENTIAL_PEPPER environment variable required")
        })?;

        Self::validate_pepper(&credential_pepper, "LEDGER_CREDENTIAL_PEPPER")?;

        Ok(Self { credential_pepper })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        use base64::Engine;
        let credential_pepper =
            base64::engine::general_purpose::STANDARD.encode(rand::random::<[u8; 32]>());
        Self { credential_pepper }
    }

    /// Validate a base64-encoded pepper
    fn validate_pepper(pepper: &str, name: &str) -> Result<()> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(pepper)
            .map_err(|_| Error::configuration(format!("{name} must be valid base64")))?;

        if decoded.len() < MIN_PEPPER_LEN {
            return Err(Error::configuration(format!(
                "{name} must be at least {MIN_PEPPER_LEN} bytes when decoded"
            )));
        }

        Ok(())
    }

    /// Get credential pepper as bytes
    pub fn credential_pepper_bytes(&self) -> Result<Vec<u8>> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&self.credential_pepper)
            .map_err(|_| Error::configuration("Invalid credential pepper"))
    }
}

/// Which durable store backs the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackend {
    Memory,
    File,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Journal path, required for the file backend
    pub data_path: Option<PathBuf>,
    /// fsync after every committed batch
    pub sync_writes: bool,
}

impl StorageConfig {
    /// Load storage configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let backend = match std::env::var("LEDGER_STORAGE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StorageBackend::Memory,
            "file" => StorageBackend::File,
            other => {
                return Err(Error::configuration(format!(
                    "Invalid LEDGER_STORAGE: {other} (expected memory or file)"
                )));
            }
        };

        let data_path = std::env::var("LEDGER_DATA_PATH").ok().map(PathBuf::from);
        if backend == StorageBackend::File && data_path.is_none() {
            return Err(Error::configuration(
                "LEDGER_DATA_PATH is required when LEDGER_STORAGE=file",
            ));
        }

        let sync_writes = std::env::var("LEDGER_SYNC_WRITES")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .map_err(|_| Error::configuration("Invalid LEDGER_SYNC_WRITES"))?;

        Ok(Self {
            backend,
            data_path,
            sync_writes,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_path: None,
            sync_writes: false,
        }
    }
}

/// Operation limits for the awaitable service facade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Default deadline for a mutating operation, in milliseconds
    pub operation_timeout_ms: u64,
}

impl ServiceConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub security: SecurityConfig,
    pub storage: StorageConfig,
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
}

impl LedgerConfig {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let security = SecurityConfig::from_env()?;
        let storage = StorageConfig::from_env()?;

        let operation_timeout_ms = std::env::var("LEDGER_OPERATION_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| Error::configuration("Invalid LEDGER_OPERATION_TIMEOUT_MS"))?;

        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        };

        Ok(Self {
            security,
            storage,
            service: ServiceConfig {
                operation_timeout_ms,
            },
            logging,
        })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            security: SecurityConfig::for_testing(),
            storage: StorageConfig::in_memory(),
            service: ServiceConfig {
                operation_timeout_ms: 2000,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

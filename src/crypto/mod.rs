//! Cryptographic primitives for the election ledger

pub mod secure;

use crate::types::Hash;
use crate::{Error, Result};

pub use secure::{CredentialHash, CredentialHasher, SecureMemory};

/// Cryptographic utilities
pub struct CryptoUtils;

impl CryptoUtils {
    /// Hash arbitrary data with Blake3
    pub fn hash(data: &[u8]) -> Hash {
        blake3::hash(data).into()
    }

    /// Link a log entry to its predecessor: `H(previous || content)`
    pub fn chain_hash(previous: &Hash, content: &[u8]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(previous);
        hasher.update(content);
        hasher.finalize().into()
    }

    /// Verify that two hashes are equal in constant time
    pub fn constant_time_eq(a: &Hash, b: &Hash) -> bool {
        use subtle::ConstantTimeEq;
        a.ct_eq(b).into()
    }

    /// Convert a hex string to a hash
    pub fn hex_to_hash(hex: &str) -> Result<Hash> {
        if hex.len() != 64 {
            return Err(Error::validation(format!(
                "hash hex length: expected 64, got {}",
                hex.len()
            )));
        }

        let mut hash = [0u8; 32];
        hex::decode_to_slice(hex, &mut hash)
            .map_err(|e| Error::validation(format!("hash hex: {e}")))?;
        Ok(hash)
    }

    /// Convert a hash to a hex string
    pub fn hash_to_hex(hash: &Hash) -> String {
        hex::encode(hash)
    }
}

//! Credential hashing and constant-time helpers
//!
//! Voter credentials are never stored in the clear:
//! 1. A per-ledger pepper is loaded from configuration (minimum 32 bytes)
//! 2. Each credential gets a fresh 16-byte random salt
//! 3. The digest is a Blake3 keyed hash over salt and credential
//! 4. Verification recomputes the digest and compares in constant time

use crate::config::SecurityConfig;
use crate::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

/// Key derivation context for the credential key
const CREDENTIAL_KEY_CONTEXT: &str = "election-ledger 2024 voter credential key";

/// Salt length for new credentials
const SALT_LEN: usize = 16;

/// Minimum pepper length accepted
pub const MIN_PEPPER_LEN: usize = 32;

/// Salted keyed hash of a voter credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHash {
    #[serde(with = "serde_bytes")]
    salt: Vec<u8>,
    #[serde(with = "serde_bytes")]
    digest: Vec<u8>,
}

impl fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialHash(<redacted>)")
    }
}

/// Hashes and verifies voter credentials under the ledger's pepper
#[derive(Clone)]
pub struct CredentialHasher {
    key: Zeroizing<[u8; 32]>,
    decoy: CredentialHash,
}

impl CredentialHasher {
    /// Create a hasher from raw pepper bytes
    pub fn new(pepper: &[u8]) -> Result<Self> {
        if pepper.len() < MIN_PEPPER_LEN {
            return Err(Error::configuration(format!(
                "credential pepper must be at least {MIN_PEPPER_LEN} bytes"
            )));
        }

        Ok(Self::from_pepper(pepper))
    }

    /// Create a hasher from the security configuration
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let pepper = Zeroizing::new(config.credential_pepper_bytes()?);
        Self::new(&pepper)
    }

    /// Create for testing with a random pepper
    pub fn for_testing() -> Self {
        Self::from_pepper(&SecureMemory::secure_random_bytes::<MIN_PEPPER_LEN>())
    }

    fn from_pepper(pepper: &[u8]) -> Self {
        let key = Zeroizing::new(blake3::derive_key(CREDENTIAL_KEY_CONTEXT, pepper));
        let decoy = Self::hash_with_key(&key, &SecureMemory::secure_random_bytes::<32>());
        Self { key, decoy }
    }

    /// Hash a plaintext credential with a fresh salt
    pub fn hash(&self, credential: &str) -> CredentialHash {
        Self::hash_with_key(&self.key, credential.as_bytes())
    }

    /// Check a supplied credential against a stored hash in constant time
    pub fn verify(&self, stored: &CredentialHash, supplied: &str) -> bool {
        let expected = Self::digest(&self.key, &stored.salt, supplied.as_bytes());
        SecureMemory::constant_time_eq(&expected[..], &stored.digest)
    }

    /// Spend the same work as [`verify`](Self::verify) for an unknown voter.
    ///
    /// Always returns `false`.
    pub fn verify_decoy(&self, supplied: &str) -> bool {
        std::hint::black_box(self.verify(&self.decoy, supplied));
        false
    }

    fn hash_with_key(key: &[u8; 32], credential: &[u8]) -> CredentialHash {
        let salt = SecureMemory::secure_random_bytes::<SALT_LEN>().to_vec();
        let digest = Self::digest(key, &salt, credential);
        CredentialHash {
            salt,
            digest: digest.to_vec(),
        }
    }

    fn digest(key: &[u8; 32], salt: &[u8], credential: &[u8]) -> Zeroizing<[u8; 32]> {
        let mut hasher = blake3::Hasher::new_keyed(key);
        hasher.update(salt);
        hasher.update(credential);
        Zeroizing::new(hasher.finalize().into())
    }
}

impl fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialHasher(<redacted>)")
    }
}

/// Secure memory utilities
pub struct SecureMemory;

impl SecureMemory {
    /// Securely compare two byte arrays in constant time
    pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
        use subtle::ConstantTimeEq;
        if a.len() != b.len() {
            return false;
        }
        a.ct_eq(b).into()
    }

    /// Generate cryptographically secure random bytes
    pub fn secure_random_bytes<const N: usize>() -> [u8; N] {
        let mut bytes = [0u8; N];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }
}

//! cipherbatch hash functions
//!
//! BLAKE3 everywhere. Protocol digests go through [`DomainHasher`], which runs
//! BLAKE3 in derive-key mode so that a commitment can never be confused with a
//! proof digest or a handle derivation even over identical input bytes.

pub use blake3;

/// Context string for batch content commitments
pub const BATCH_COMMITMENT_CONTEXT: &str = "cipherbatch 2026-01 batch content commitment v1";

/// Context string for oracle proof digests
pub const ORACLE_PROOF_CONTEXT: &str = "cipherbatch 2026-01 oracle decryption proof v1";

/// Context string for ciphertext handle derivation
pub const HANDLE_CONTEXT: &str = "cipherbatch 2026-01 ciphertext handle v1";

/// Hash data using BLAKE3
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Keyed hash using BLAKE3 (for PRF)
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    *blake3::keyed_hash(key, data).as_bytes()
}

/// Incremental, domain-separated hasher
///
/// Integers are written little-endian with a fixed width so that the encoding
/// of a sequence of fields is unambiguous.
#[derive(Clone)]
pub struct DomainHasher {
    inner: blake3::Hasher,
}

impl DomainHasher {
    /// Create a hasher bound to a context string
    pub fn new(context: &str) -> Self {
        Self {
            inner: blake3::Hasher::new_derive_key(context),
        }
    }

    /// Absorb raw bytes
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Absorb a u64
    pub fn update_u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(&value.to_le_bytes());
        self
    }

    /// Finish and return the 32-byte digest
    pub fn finalize(&self) -> [u8; 32] {
        *self.inner.finalize().as_bytes()
    }
}

impl std::fmt::Debug for DomainHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainHasher").finish_non_exhaustive()
    }
}

//! Opaque ciphertext handles
//!
//! A handle is a 32-byte reference to a value held by an FHE engine. It says
//! nothing about the plaintext. The last byte carries the value type so that a
//! boolean can never be passed where an integer is expected; the all-zero
//! handle is what an uninitialized slot looks like and is never produced by an
//! engine.

use std::fmt;

use cipherbatch_hash::{DomainHasher, HANDLE_CONTEXT};
use serde::{Deserialize, Serialize};

/// Value type tag stored in the last byte of a handle
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    Bool = 0,
    Uint64 = 5,
}

impl HandleKind {
    /// Decode a type tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(HandleKind::Bool),
            5 => Some(HandleKind::Uint64),
            _ => None,
        }
    }
}

/// Reference to an encrypted value
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CiphertextHandle([u8; 32]);

impl CiphertextHandle {
    /// The uninitialized handle
    pub const ZERO: CiphertextHandle = CiphertextHandle([0u8; 32]);

    /// Wrap raw bytes received from a caller
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive a fresh handle for an engine-owned value
    pub fn derive(engine_id: &[u8; 32], sequence: u64, kind: HandleKind) -> Self {
        let mut hasher = DomainHasher::new(HANDLE_CONTEXT);
        hasher
            .update(engine_id)
            .update_u64(sequence)
            .update(&[kind as u8]);
        let mut bytes = hasher.finalize();
        bytes[31] = kind as u8;
        // A zero prefix would make the handle indistinguishable from ZERO.
        if bytes[..31].iter().all(|&b| b == 0) {
            bytes[0] = 1;
        }
        Self(bytes)
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True for the uninitialized handle
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Type tag, if the last byte is a known tag
    pub fn kind(&self) -> Option<HandleKind> {
        HandleKind::from_tag(self.0[31])
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl Default for CiphertextHandle {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CiphertextHandle({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Encrypted boolean, the result of a homomorphic comparison
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncryptedBool(CiphertextHandle);

impl EncryptedBool {
    /// Wrap a handle
    pub fn from_handle(handle: CiphertextHandle) -> Self {
        Self(handle)
    }

    /// The underlying handle
    pub fn handle(&self) -> &CiphertextHandle {
        &self.0
    }
}

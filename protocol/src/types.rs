//! Identifiers and call context

use std::fmt;

use serde::{Deserialize, Serialize};

/// Account identity of a caller (owner, provider, oracle)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity([u8; 32]);

impl Identity {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character hex string
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x")).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Identity of one deployed protocol instance
///
/// Mixed into every commitment so a decryption answer for one instance can
/// never be replayed against another.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId([u8; 32]);

impl InstanceId {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive from the deployer and a deployment nonce
    pub fn derive(deployer: &Identity, nonce: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"cipherbatch_instance");
        hasher.update(deployer.as_bytes());
        hasher.update(&nonce.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", &self.to_hex()[..16])
    }
}

/// Batch identifier; 0 means no batch has been opened yet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(pub u64);

impl BatchId {
    /// The "no batch yet" sentinel
    pub const NONE: BatchId = BatchId(0);

    /// True for the sentinel
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Next id in sequence
    pub fn next(&self) -> BatchId {
        BatchId(self.0 + 1)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque request identifier issued by the decryption oracle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Rate-limited action classes, each with its own cooldown clock
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionClass {
    Submission,
    DecryptionRequest,
}

/// Record collections held by a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Marker,
    Command,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Marker => write!(f, "marker"),
            RecordKind::Command => write!(f, "command"),
        }
    }
}

/// Who is calling, and when (seconds since the Unix epoch)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Identity,
    pub now: u64,
}

impl CallContext {
    /// Create a new call context
    pub fn new(caller: Identity, now: u64) -> Self {
        Self { caller, now }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_depends_on_nonce() {
        let deployer = Identity::from_bytes([1u8; 32]);
        assert_ne!(InstanceId::derive(&deployer, 0), InstanceId::derive(&deployer, 1));
    }

    #[test]
    fn test_identity_hex() {
        let id = Identity::from_bytes([0xab; 32]);
        assert_eq!(Identity::from_hex(&id.to_hex()), Some(id));
        assert_eq!(Identity::from_hex(&format!("0x{}", id.to_hex())), Some(id));
        assert_eq!(Identity::from_hex("00"), None);
    }

    #[test]
    fn test_batch_id_sequence() {
        assert!(BatchId::NONE.is_none());
        assert_eq!(BatchId::NONE.next(), BatchId(1));
        assert_eq!(BatchId(7).to_string(), "#7");
    }
}

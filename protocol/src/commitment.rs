//! Batch content commitment
//!
//! Binds a decryption request to the exact ciphertexts of a batch. The digest
//! absorbs, in order:
//!
//! 1. the protocol instance id (no cross-instance replay)
//! 2. the marker count and the command count
//! 3. every marker handle in append order: x, y, unit type, count
//! 4. every command handle in append order: target x, target y, command type, unit id
//!
//! Handles are fixed width, so with both counts up front the encoding is
//! injective.

use std::fmt;

use cipherbatch_hash::{DomainHasher, BATCH_COMMITMENT_CONTEXT};
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::records::{Command, Marker};
use crate::types::InstanceId;

/// 32-byte commitment over a batch's ciphertext handles
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchCommitment([u8; 32]);

impl BatchCommitment {
    /// Commit to a list of markers and commands
    pub fn compute(instance: &InstanceId, markers: &[Marker], commands: &[Command]) -> Self {
        let mut hasher = DomainHasher::new(BATCH_COMMITMENT_CONTEXT);
        hasher
            .update(instance.as_bytes())
            .update_u64(markers.len() as u64)
            .update_u64(commands.len() as u64);

        for marker in markers {
            for handle in marker.handles() {
                hasher.update(handle.as_bytes());
            }
        }
        for command in commands {
            for handle in command.handles() {
                hasher.update(handle.as_bytes());
            }
        }

        Self(hasher.finalize())
    }

    /// Commit to the current content of a batch
    pub fn of_batch(instance: &InstanceId, batch: &Batch) -> Self {
        Self::compute(instance, batch.markers(), batch.commands())
    }

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
}

impl fmt::Debug for BatchCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchCommitment({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for BatchCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

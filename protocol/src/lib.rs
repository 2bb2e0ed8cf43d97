//! cipherbatch protocol core
//!
//! Batched submission of encrypted records with verified decryption callbacks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Submission & Decryption              │
//! ├─────────────────────────────────────────────────────┤
//! │  AccessControl    owner/provider roles, pause,      │
//! │                   per-submitter cooldowns           │
//! │      ↓                                              │
//! │  BatchLedger      open/close lifecycle, capacity    │
//! │      ↓                                              │
//! │  Record store     markers/commands, encrypted       │
//! │                   validity predicates               │
//! │      ↓                                              │
//! │  Oracle bridge    commitment, request/callback,     │
//! │                   replay + drift + proof checks     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! All of it lives in one [`ProtocolState`]. Every operation checks all of
//! its preconditions before touching state and returns a [`Receipt`] with the
//! events it emitted.

pub mod access;
pub mod batch;
pub mod bridge;
pub mod commitment;
pub mod config;
pub mod errors;
pub mod events;
pub mod protocol;
pub mod records;
pub mod state;
pub mod types;

// Re-export main types
pub use access::{AccessControl, CooldownLedger};
pub use batch::{Batch, BatchLedger};
pub use bridge::{
    ContextTable, DecryptionContext, DecryptionOracle, DecryptionOutcome, DecryptionRequest,
    ProofStatement, ProofVerifier,
};
pub use commitment::BatchCommitment;
pub use config::{ProtocolConfig, RetentionPolicy};
pub use errors::{ErrorClass, ProtocolError, ProtocolResult};
pub use events::{ProtocolEvent, Receipt};
pub use protocol::Protocol;
pub use records::{Command, Marker};
pub use state::{ProtocolState, SNAPSHOT_VERSION};
pub use types::{ActionClass, BatchId, CallContext, Identity, InstanceId, RecordKind, RequestId};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bridge::{DecryptionOracle, DecryptionOutcome, DecryptionRequest, ProofVerifier};
    pub use crate::commitment::BatchCommitment;
    pub use crate::config::ProtocolConfig;
    pub use crate::errors::{ProtocolError, ProtocolResult};
    pub use crate::events::{ProtocolEvent, Receipt};
    pub use crate::protocol::Protocol;
    pub use crate::records::{Command, Marker};
    pub use crate::state::ProtocolState;
    pub use crate::types::{BatchId, CallContext, Identity, InstanceId, RequestId};
}

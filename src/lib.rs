//! cipherbatch: encrypted batch submission with verified decryption
//!
//! This is the root crate that re-exports the cipherbatch components and hosts
//! the async service that runs a protocol instance next to its oracle.
//!
//! ## Architecture Overview
//!
//! Authorized providers submit encrypted markers and commands into batches.
//! Validity is checked on ciphertexts; only the pass/fail bit is ever
//! revealed. Decrypting a batch is a two-phase exchange with an external
//! oracle, and the answer is accepted only if the batch is unchanged since the
//! request and the oracle's threshold proof verifies.
//!
//! ## Crate Organization
//!
//! - `cipherbatch-hash`: Domain-separated BLAKE3 hashing
//! - `cipherbatch-fhe`: Ciphertext handles and engine capabilities
//! - `cipherbatch-protocol`: Roles, batches, records, oracle bridge
//! - `cipherbatch-oracle`: Local threshold-signing decryption oracle
//! - `cipherbatch-cli`: Command-line driver

pub mod service;

// Re-export all crates for integration testing
pub use cipherbatch_fhe as fhe;
pub use cipherbatch_hash as hash;
pub use cipherbatch_oracle as oracle;
pub use cipherbatch_protocol as protocol;

/// cipherbatch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Service defaults
pub mod config {
    /// Seconds before an unanswered decryption request is overdue
    pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

    /// Buffered events per subscriber
    pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

    /// Buffered requests and responses between host and oracle worker
    pub const DEFAULT_RELAY_CAPACITY: usize = 256;
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use cipherbatch_fhe::{Decryptor, Encryptor, FheEngine, LocalEngine};
    pub use cipherbatch_oracle::{Committee, CommitteeVerifier, LocalOracle, OracleConfig};
    pub use cipherbatch_protocol::prelude::*;
    pub use crate::service::{BatchService, CallbackStatus, ServiceConfig, ServiceError};
}

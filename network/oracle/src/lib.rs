//! Local decryption oracle for cipherbatch
//!
//! A committee of ed25519 signers that decrypts batches through an FHE
//! [`Decryptor`](cipherbatch_fhe::Decryptor) and attests to the cleartexts
//! with a t-of-n threshold proof.
//!
//! # Flow
//!
//! ```text
//!  protocol ──submit(DecryptionRequest)──▶ LocalOracle ──▶ RequestId
//!                                             │
//!                                   fulfill(RequestId)
//!                                             ▼
//!  protocol ◀──on_decryption_callback── OracleResponse{cleartexts, proof}
//!     │
//!     └── CommitteeVerifier: ≥ t distinct valid signatures over the statement
//! ```

pub mod errors;
pub mod local;
pub mod proof;

pub use errors::{OracleError, OracleResult};
pub use local::{respond, LocalOracle, OracleConfig, OracleResponse};
pub use proof::{Committee, CommitteeVerifier, MemberSignature, OracleProof};

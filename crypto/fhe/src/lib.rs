//! cipherbatch FHE engine boundary
//!
//! The protocol treats encrypted values as opaque [`CiphertextHandle`]s and
//! asks an engine to evaluate predicates over them without decryption.
//!
//! # Key Features:
//! - 32-byte handles with a type tag; the zero handle is "never initialized"
//! - [`FheEngine`]: scalar comparisons, logical AND, well-formedness checks
//! - [`Decryptor`] / [`Encryptor`]: oracle-side and client-side capabilities
//!
//! # Engines:
//! - [`LocalEngine`]: in-process registry, for development and tests
//! - `TfheEngine`: TFHE-rs backend (cargo feature `tfhe`)

pub mod engine;
pub mod errors;
pub mod handle;
pub mod local;
#[cfg(feature = "tfhe")]
pub mod tfhe_engine;

pub use engine::{Decryptor, Encryptor, FheEngine};
pub use errors::FHEError;
pub use handle::{CiphertextHandle, EncryptedBool, HandleKind};
pub use local::LocalEngine;
#[cfg(feature = "tfhe")]
pub use tfhe_engine::TfheEngine;

/// FHE Configuration
#[derive(Clone, Debug)]
pub struct FHEConfig {
    /// Security parameter (bits); below 128 selects small test parameters
    pub security_bits: u32,
    /// Fixed engine identity, for reproducible handles
    pub seed: Option<[u8; 32]>,
}

impl Default for FHEConfig {
    fn default() -> Self {
        Self {
            security_bits: 128,
            seed: None,
        }
    }
}

impl FHEConfig {
    /// Reject parameter sets no backend supports
    pub fn validate(&self) -> FHEResult<()> {
        if self.security_bits < 32 {
            return Err(FHEError::ConfigError(format!(
                "security_bits {} below minimum 32",
                self.security_bits
            )));
        }
        Ok(())
    }
}

/// Result type for FHE operations
pub type FHEResult<T> = Result<T, FHEError>;

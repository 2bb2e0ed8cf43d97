//! FHE Error types

use thiserror::Error;

use crate::handle::HandleKind;

/// Errors raised by an engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FHEError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Handle does not reference a value produced by this engine
    #[error("Unknown ciphertext handle: {0}")]
    UnknownHandle(String),

    /// Handle references a value of the wrong type
    #[error("Type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        expected: HandleKind,
        found: HandleKind,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

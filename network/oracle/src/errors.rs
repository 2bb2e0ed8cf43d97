//! Decryption oracle error types

use cipherbatch_protocol::{ProtocolError, RequestId};
use thiserror::Error;

/// Errors that can occur in the local oracle committee
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("Request queue full: capacity {capacity}")]
    QueueFull { capacity: usize },

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Invalid committee: {0}")]
    InvalidCommittee(String),

    #[error("Malformed proof: {0}")]
    MalformedProof(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<bincode::Error> for OracleError {
    fn from(err: bincode::Error) -> Self {
        OracleError::SerializationError(err.to_string())
    }
}

impl From<OracleError> for ProtocolError {
    fn from(err: OracleError) -> Self {
        ProtocolError::OracleUnavailable(err.to_string())
    }
}

/// Result type for oracle operations
pub type OracleResult<T> = Result<T, OracleError>;

//! Error types for protocol operations
//!
//! Every rejected call leaves the state untouched. Each condition has its own
//! variant; [`ErrorClass`] groups them for callers that only care whether to
//! retry, surface, or raise an alarm.

use cipherbatch_fhe::FHEError;
use thiserror::Error;

use crate::types::{ActionClass, BatchId, Identity, RecordKind, RequestId};

/// Errors that can occur during protocol operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Caller {0} is not the owner")]
    NotOwner(Identity),

    #[error("Caller {0} is not a provider")]
    NotProvider(Identity),

    #[error("The owner's provider role cannot be removed")]
    OwnerRoleProtected,

    #[error("Protocol is paused")]
    Paused,

    #[error("Protocol is already paused")]
    AlreadyPaused,

    #[error("Batch {0} is not open")]
    BatchClosed(BatchId),

    #[error("Batch {0} is already open")]
    AlreadyOpen(BatchId),

    #[error("Invalid batch id {0}")]
    InvalidBatchId(BatchId),

    #[error("Batch {0} has no records")]
    EmptyBatch(BatchId),

    #[error("Cooldown active for {action:?}: {remaining_secs}s remaining")]
    CooldownActive {
        action: ActionClass,
        remaining_secs: u64,
    },

    #[error("Batch {batch} holds the maximum of {max} markers")]
    MaxMarkersReached { batch: BatchId, max: u32 },

    #[error("Batch {batch} holds the maximum of {max} commands")]
    MaxCommandsReached { batch: BatchId, max: u32 },

    #[error("Ciphertext handle {field} is not initialized")]
    NotInitialized { field: &'static str },

    #[error("Coordinates out of bounds")]
    InvalidCoordinates,

    #[error("Command type out of range")]
    InvalidCommand,

    #[error("Batch {batch} changed since request {request} was issued")]
    StateMismatch { request: RequestId, batch: BatchId },

    #[error("Request {0} was already processed")]
    ReplayAttempt(RequestId),

    #[error("Unknown decryption request {0}")]
    UnknownRequest(RequestId),

    #[error("Oracle issued request id {0} twice")]
    DuplicateRequest(RequestId),

    #[error("Decryption proof for request {0} failed verification")]
    InvalidProof(RequestId),

    #[error("Cooldown must be at least one second")]
    InvalidCooldown,

    #[error("Capacity for {0} records must be at least one")]
    InvalidCapacity(RecordKind),

    #[error("Invalid validity bounds: {0}")]
    InvalidBounds(String),

    #[error("Invalid retention policy: {0}")]
    InvalidRetention(String),

    #[error("FHE engine error: {0}")]
    Engine(String),

    #[error("Decryption oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse grouping of [`ProtocolError`] variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Authorization,
    Lifecycle,
    RateLimit,
    Capacity,
    Validation,
    Consistency,
    Proof,
    Config,
    External,
}

impl ErrorClass {
    /// Consistency and proof failures must never be ignored or downgraded
    pub fn is_security_relevant(&self) -> bool {
        matches!(self, ErrorClass::Consistency | ErrorClass::Proof)
    }
}

impl ProtocolError {
    /// Class of this error
    pub fn class(&self) -> ErrorClass {
        use ProtocolError::*;
        match self {
            NotOwner(_) | NotProvider(_) | OwnerRoleProtected => ErrorClass::Authorization,
            Paused | AlreadyPaused | BatchClosed(_) | AlreadyOpen(_) | InvalidBatchId(_)
            | EmptyBatch(_) => ErrorClass::Lifecycle,
            CooldownActive { .. } => ErrorClass::RateLimit,
            MaxMarkersReached { .. } | MaxCommandsReached { .. } => ErrorClass::Capacity,
            NotInitialized { .. } | InvalidCoordinates | InvalidCommand => ErrorClass::Validation,
            StateMismatch { .. } | ReplayAttempt(_) | UnknownRequest(_) | DuplicateRequest(_) => {
                ErrorClass::Consistency
            }
            InvalidProof(_) => ErrorClass::Proof,
            InvalidCooldown | InvalidCapacity(_) | InvalidBounds(_) | InvalidRetention(_) => {
                ErrorClass::Config
            }
            Engine(_) | OracleUnavailable(_) | Serialization(_) => ErrorClass::External,
        }
    }

    /// A redelivered oracle callback; safe to drop
    pub fn is_benign_duplicate(&self) -> bool {
        matches!(self, ProtocolError::ReplayAttempt(_))
    }
}

impl From<FHEError> for ProtocolError {
    fn from(err: FHEError) -> Self {
        ProtocolError::Engine(err.to_string())
    }
}

impl From<bincode::Error> for ProtocolError {
    fn from(err: bincode::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

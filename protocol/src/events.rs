//! Outbound notifications
//!
//! Operations never publish anything themselves. Each successful call returns
//! a [`Receipt`] carrying its output and the events it produced, in order; the
//! host decides where they go (ledger log, message bus, tracing).

use serde::{Deserialize, Serialize};

use crate::commitment::BatchCommitment;
use crate::types::{BatchId, Identity, RecordKind, RequestId};

/// A state change that actually happened
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    ProviderAdded {
        provider: Identity,
    },
    ProviderRemoved {
        provider: Identity,
    },
    OwnershipTransferred {
        previous: Identity,
        owner: Identity,
    },
    Paused {
        by: Identity,
    },
    Unpaused {
        by: Identity,
    },
    CooldownChanged {
        old_secs: u64,
        new_secs: u64,
    },
    CapacityChanged {
        kind: RecordKind,
        old_max: u32,
        new_max: u32,
    },
    BatchOpened {
        batch_id: BatchId,
    },
    BatchClosed {
        batch_id: BatchId,
    },
    MarkerSubmitted {
        batch_id: BatchId,
        index: u32,
        submitter: Identity,
    },
    CommandSubmitted {
        batch_id: BatchId,
        index: u32,
        submitter: Identity,
    },
    DecryptionRequested {
        request_id: RequestId,
        batch_id: BatchId,
        commitment: BatchCommitment,
    },
    DecryptionCompleted {
        request_id: RequestId,
        batch_id: BatchId,
    },
    ContextsPruned {
        count: usize,
    },
}

impl ProtocolEvent {
    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::ProviderAdded { .. } => "provider_added",
            ProtocolEvent::ProviderRemoved { .. } => "provider_removed",
            ProtocolEvent::OwnershipTransferred { .. } => "ownership_transferred",
            ProtocolEvent::Paused { .. } => "paused",
            ProtocolEvent::Unpaused { .. } => "unpaused",
            ProtocolEvent::CooldownChanged { .. } => "cooldown_changed",
            ProtocolEvent::CapacityChanged { .. } => "capacity_changed",
            ProtocolEvent::BatchOpened { .. } => "batch_opened",
            ProtocolEvent::BatchClosed { .. } => "batch_closed",
            ProtocolEvent::MarkerSubmitted { .. } => "marker_submitted",
            ProtocolEvent::CommandSubmitted { .. } => "command_submitted",
            ProtocolEvent::DecryptionRequested { .. } => "decryption_requested",
            ProtocolEvent::DecryptionCompleted { .. } => "decryption_completed",
            ProtocolEvent::ContextsPruned { .. } => "contexts_pruned",
        }
    }
}

/// Output of a successful operation plus the events it emitted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt<T> {
    pub output: T,
    pub events: Vec<ProtocolEvent>,
}

impl<T> Receipt<T> {
    /// Receipt with no events (idempotent no-op)
    pub fn quiet(output: T) -> Self {
        Self {
            output,
            events: Vec::new(),
        }
    }

    /// Receipt with a single event
    pub fn with_event(output: T, event: ProtocolEvent) -> Self {
        Self {
            output,
            events: vec![event],
        }
    }

    /// Map the output, keeping the events
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Receipt<U> {
        Receipt {
            output: f(self.output),
            events: self.events,
        }
    }
}

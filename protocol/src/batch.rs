//! Batch lifecycle
//!
//! Closed -> Open -> Closed -> ... The id only advances when a batch opens,
//! ids are never reused and at most one batch is open at a time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{ProtocolError, ProtocolResult};
use crate::events::{ProtocolEvent, Receipt};
use crate::records::{Command, Marker};
use crate::state::ProtocolState;
use crate::types::{BatchId, CallContext};

/// One submission batch and its records
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub open: bool,
    pub opened_at: u64,
    pub closed_at: Option<u64>,
    pub(crate) markers: Vec<Marker>,
    pub(crate) commands: Vec<Command>,
}

impl Batch {
    fn new(id: BatchId, opened_at: u64) -> Self {
        Self {
            id,
            open: true,
            opened_at,
            closed_at: None,
            markers: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Markers in append order
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Commands in append order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// True if no record was ever appended
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty() && self.commands.is_empty()
    }
}

/// All batches ever opened, keyed by id
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchLedger {
    current: BatchId,
    batches: BTreeMap<BatchId, Batch>,
}

impl BatchLedger {
    pub fn current_id(&self) -> BatchId {
        self.current
    }

    pub fn get(&self, id: BatchId) -> Option<&Batch> {
        self.batches.get(&id)
    }

    /// The most recent batch, open or not
    pub fn current(&self) -> Option<&Batch> {
        self.batches.get(&self.current)
    }

    /// The open batch, if any
    pub(crate) fn open_mut(&mut self) -> ProtocolResult<&mut Batch> {
        match self.batches.get_mut(&self.current) {
            Some(batch) if batch.open => Ok(batch),
            _ => Err(ProtocolError::BatchClosed(self.current)),
        }
    }

    pub(crate) fn require_open(&self) -> ProtocolResult<&Batch> {
        match self.current() {
            Some(batch) if batch.open => Ok(batch),
            _ => Err(ProtocolError::BatchClosed(self.current)),
        }
    }

    fn is_open(&self) -> bool {
        self.current().map_or(false, |b| b.open)
    }
}

impl ProtocolState {
    /// Open the next batch
    pub fn open_batch(&mut self, ctx: &CallContext) -> ProtocolResult<Receipt<BatchId>> {
        self.access.require_owner(&ctx.caller)?;
        self.access.require_unpaused()?;
        if self.batches.is_open() {
            return Err(ProtocolError::AlreadyOpen(self.batches.current));
        }

        let id = self.batches.current.next();
        self.batches.batches.insert(id, Batch::new(id, ctx.now));
        self.batches.current = id;

        info!(batch = %id, "Batch opened");
        Ok(Receipt::with_event(id, ProtocolEvent::BatchOpened { batch_id: id }))
    }

    /// Close the open batch. Closed batches are never reopened.
    pub fn close_batch(&mut self, ctx: &CallContext) -> ProtocolResult<Receipt<BatchId>> {
        self.access.require_owner(&ctx.caller)?;
        let batch = self.batches.open_mut()?;
        batch.open = false;
        batch.closed_at = Some(ctx.now);
        let id = batch.id;

        info!(
            batch = %id,
            markers = batch.markers.len(),
            commands = batch.commands.len(),
            "Batch closed"
        );
        Ok(Receipt::with_event(id, ProtocolEvent::BatchClosed { batch_id: id }))
    }

    /// Id of the most recent batch; `BatchId::NONE` before the first one
    pub fn current_batch_id(&self) -> BatchId {
        self.batches.current_id()
    }

    /// True while a batch accepts records
    pub fn is_batch_open(&self) -> bool {
        self.batches.is_open()
    }

    /// Look up a batch
    pub fn batch(&self, id: BatchId) -> ProtocolResult<&Batch> {
        self.batches
            .get(id)
            .ok_or(ProtocolError::InvalidBatchId(id))
    }

    /// Ids of all batches, ascending
    pub fn batch_ids(&self) -> impl Iterator<Item = BatchId> + '_ {
        self.batches.batches.keys().copied()
    }
}

//! Encrypted record store
//!
//! Markers and commands are four ciphertext handles each. They are never
//! decrypted here: validity is an encrypted predicate evaluated by the engine,
//! whose result must itself be a well-formed encrypted boolean before its bit
//! is allowed to drive the accept/reject decision.

use cipherbatch_fhe::{CiphertextHandle, EncryptedBool, FHEResult, FheEngine};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::Batch;
use crate::errors::{ProtocolError, ProtocolResult};
use crate::events::{ProtocolEvent, Receipt};
use crate::state::ProtocolState;
use crate::types::{ActionClass, BatchId, CallContext, RecordKind};

/// A unit placement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub x: CiphertextHandle,
    pub y: CiphertextHandle,
    pub unit_type: CiphertextHandle,
    pub count: CiphertextHandle,
}

impl Marker {
    /// Handles in commitment order
    pub fn handles(&self) -> [CiphertextHandle; 4] {
        [self.x, self.y, self.unit_type, self.count]
    }

    fn fields(&self) -> [(&'static str, &CiphertextHandle); 4] {
        [
            ("x", &self.x),
            ("y", &self.y),
            ("unit_type", &self.unit_type),
            ("count", &self.count),
        ]
    }
}

/// An order issued against a unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub target_x: CiphertextHandle,
    pub target_y: CiphertextHandle,
    pub command_type: CiphertextHandle,
    pub unit_id: CiphertextHandle,
}

impl Command {
    /// Handles in commitment order
    pub fn handles(&self) -> [CiphertextHandle; 4] {
        [self.target_x, self.target_y, self.command_type, self.unit_id]
    }

    fn fields(&self) -> [(&'static str, &CiphertextHandle); 4] {
        [
            ("target_x", &self.target_x),
            ("target_y", &self.target_y),
            ("command_type", &self.command_type),
            ("unit_id", &self.unit_id),
        ]
    }
}

fn require_initialized<E: FheEngine>(
    engine: &E,
    fields: [(&'static str, &CiphertextHandle); 4],
) -> ProtocolResult<()> {
    for (field, handle) in fields {
        if handle.is_zero() || !engine.is_initialized(handle) {
            return Err(ProtocolError::NotInitialized { field });
        }
    }
    Ok(())
}

/// Accept only a well-formed predicate whose bit is set
fn require_predicate<E: FheEngine>(
    engine: &E,
    predicate: FHEResult<EncryptedBool>,
    rejection: ProtocolError,
) -> ProtocolResult<()> {
    let predicate = predicate?;
    let accepted = if engine.is_bool_initialized(&predicate) {
        engine.reveal_gate(&predicate)
    } else {
        Ok(false)
    };
    engine.release(&predicate);
    match accepted {
        Ok(true) => Ok(()),
        Ok(false) => Err(rejection),
        Err(e) => Err(e.into()),
    }
}

/// Encrypted `x <= max && y <= max`
fn coordinates_in_bounds<E: FheEngine>(
    engine: &E,
    x: &CiphertextHandle,
    y: &CiphertextHandle,
    max: u64,
) -> FHEResult<EncryptedBool> {
    let x_ok = engine.in_range(x, 0, max)?;
    let y_ok = match engine.in_range(y, 0, max) {
        Ok(y_ok) => y_ok,
        Err(e) => {
            engine.release(&x_ok);
            return Err(e);
        }
    };
    let both = engine.and(&x_ok, &y_ok);
    engine.release(&x_ok);
    engine.release(&y_ok);
    both
}

impl ProtocolState {
    /// Gates shared by both record kinds, up to and including capacity
    fn admit_submission(&self, ctx: &CallContext, kind: RecordKind) -> ProtocolResult<&Batch> {
        self.access.require_provider(&ctx.caller)?;
        self.access.require_unpaused()?;
        self.cooldowns.check(
            &ctx.caller,
            ActionClass::Submission,
            self.config.cooldown_secs,
            ctx.now,
        )?;

        let batch = self.batches.require_open()?;
        let max = self.config.capacity(kind);
        match kind {
            RecordKind::Marker if batch.markers.len() as u64 >= max as u64 => {
                Err(ProtocolError::MaxMarkersReached { batch: batch.id, max })
            }
            RecordKind::Command if batch.commands.len() as u64 >= max as u64 => {
                Err(ProtocolError::MaxCommandsReached { batch: batch.id, max })
            }
            _ => Ok(batch),
        }
    }

    /// Append a marker to the open batch; returns its index within the batch
    pub fn submit_marker<E: FheEngine>(
        &mut self,
        engine: &E,
        ctx: &CallContext,
        marker: Marker,
    ) -> ProtocolResult<Receipt<u32>> {
        self.admit_submission(ctx, RecordKind::Marker)?;
        require_initialized(engine, marker.fields())?;
        require_predicate(
            engine,
            coordinates_in_bounds(engine, &marker.x, &marker.y, self.config.coordinate_max),
            ProtocolError::InvalidCoordinates,
        )?;

        let batch = self.batches.open_mut()?;
        let index = batch.markers.len() as u32;
        batch.markers.push(marker);
        let batch_id = batch.id;
        self.cooldowns.touch(ctx.caller, ActionClass::Submission, ctx.now);

        info!(batch = %batch_id, index, submitter = %ctx.caller, "Marker submitted");
        Ok(Receipt::with_event(
            index,
            ProtocolEvent::MarkerSubmitted {
                batch_id,
                index,
                submitter: ctx.caller,
            },
        ))
    }

    /// Append a command to the open batch; returns its index within the batch
    pub fn submit_command<E: FheEngine>(
        &mut self,
        engine: &E,
        ctx: &CallContext,
        command: Command,
    ) -> ProtocolResult<Receipt<u32>> {
        self.admit_submission(ctx, RecordKind::Command)?;
        require_initialized(engine, command.fields())?;
        require_predicate(
            engine,
            coordinates_in_bounds(
                engine,
                &command.target_x,
                &command.target_y,
                self.config.coordinate_max,
            ),
            ProtocolError::InvalidCoordinates,
        )?;
        require_predicate(
            engine,
            engine.in_range(
                &command.command_type,
                self.config.command_type_min,
                self.config.command_type_max,
            ),
            ProtocolError::InvalidCommand,
        )?;

        let batch = self.batches.open_mut()?;
        let index = batch.commands.len() as u32;
        batch.commands.push(command);
        let batch_id = batch.id;
        self.cooldowns.touch(ctx.caller, ActionClass::Submission, ctx.now);

        info!(batch = %batch_id, index, submitter = %ctx.caller, "Command submitted");
        Ok(Receipt::with_event(
            index,
            ProtocolEvent::CommandSubmitted {
                batch_id,
                index,
                submitter: ctx.caller,
            },
        ))
    }

    /// Markers of a batch, in append order
    pub fn markers(&self, id: BatchId) -> ProtocolResult<&[Marker]> {
        Ok(self.batch(id)?.markers())
    }

    /// Commands of a batch, in append order
    pub fn commands(&self, id: BatchId) -> ProtocolResult<&[Command]> {
        Ok(self.batch(id)?.commands())
    }

    /// Number of markers in a batch
    pub fn marker_count(&self, id: BatchId) -> ProtocolResult<usize> {
        Ok(self.batch(id)?.markers.len())
    }

    /// Number of commands in a batch
    pub fn command_count(&self, id: BatchId) -> ProtocolResult<usize> {
        Ok(self.batch(id)?.commands.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use cipherbatch_fhe::{Encryptor, LocalEngine};

    fn open(state: &mut ProtocolState) {
        state.open_batch(&owner_ctx(0)).unwrap();
    }

    #[test]
    fn test_marker_accepted_with_index() {
        let engine = LocalEngine::new();
        let mut state = new_state_with_provider();
        open(&mut state);

        let receipt = state
            .submit_marker(&engine, &provider_ctx(0), marker(&engine, 10, 15, 2, 5))
            .unwrap();
        assert_eq!(receipt.output, 0);
        assert_eq!(
            receipt.events,
            vec![ProtocolEvent::MarkerSubmitted {
                batch_id: BatchId(1),
                index: 0,
                submitter: provider(),
            }]
        );
        assert_eq!(state.marker_count(BatchId(1)).unwrap(), 1);
        assert_eq!(state.last_action(&provider(), ActionClass::Submission), Some(0));
    }

    #[test]
    fn test_coordinate_boundary() {
        let engine = LocalEngine::new();
        let mut state = new_state_with_provider();
        open(&mut state);

        let err = state
            .submit_marker(&engine, &provider_ctx(0), marker(&engine, 1001, 0, 1, 1))
            .unwrap_err();
        assert_eq!(err, ProtocolError::InvalidCoordinates);
        assert_eq!(state.marker_count(BatchId(1)).unwrap(), 0);

        assert!(state
            .submit_marker(&engine, &provider_ctx(0), marker(&engine, 1000, 1000, 1, 1))
            .is_ok());
    }

    #[test]
    fn test_validation_leaves_no_intermediates() {
        let engine = LocalEngine::new();
        let mut state = new_state_with_provider();
        open(&mut state);

        let m = marker(&engine, 10, 15, 2, 5);
        let c = command(&engine, 20, 30, 3, 7);
        let rejected = marker(&engine, 1001, 0, 1, 1);
        let bad_type = command(&engine, 1, 1, 9, 0);
        let live = engine.len();

        state.submit_marker(&engine, &provider_ctx(0), m).unwrap();
        state.submit_command(&engine, &provider_ctx(100), c).unwrap();
        assert_eq!(engine.len(), live);

        assert!(state.submit_marker(&engine, &provider_ctx(200), rejected).is_err());
        assert!(state.submit_command(&engine, &provider_ctx(200), bad_type).is_err());
        assert_eq!(engine.len(), live);
    }

    #[test]
    fn test_zero_handle_not_initialized() {
        let engine = LocalEngine::new();
        let mut state = new_state_with_provider();
        open(&mut state);

        let mut m = marker(&engine, 1, 1, 1, 1);
        m.count = CiphertextHandle::ZERO;
        assert_eq!(
            state.submit_marker(&engine, &provider_ctx(0), m).unwrap_err(),
            ProtocolError::NotInitialized { field: "count" }
        );
    }

    #[test]
    fn test_foreign_handle_not_initialized() {
        let engine = LocalEngine::new();
        let other = LocalEngine::new();
        let mut state = new_state_with_provider();
        open(&mut state);

        let mut m = marker(&engine, 1, 1, 1, 1);
        m.y = other.encrypt(1).unwrap();
        assert_eq!(
            state.submit_marker(&engine, &provider_ctx(0), m).unwrap_err(),
            ProtocolError::NotInitialized { field: "y" }
        );
    }

    #[test]
    fn test_command_type_range() {
        let engine = LocalEngine::new();
        let mut state = new_state_with_provider();
        open(&mut state);

        for bad in [0, 6] {
            assert_eq!(
                state
                    .submit_command(&engine, &provider_ctx(0), command(&engine, 1, 1, bad, 0))
                    .unwrap_err(),
                ProtocolError::InvalidCommand
            );
        }
        assert_eq!(
            state
                .submit_command(&engine, &provider_ctx(0), command(&engine, 5000, 1, 1, 0))
                .unwrap_err(),
            ProtocolError::InvalidCoordinates
        );
        assert_eq!(
            state
                .submit_command(&engine, &provider_ctx(0), command(&engine, 10, 15, 5, 0))
                .unwrap()
                .output,
            0
        );
    }

    #[test]
    fn test_gate_order() {
        let engine = LocalEngine::new();
        let mut state = new_state_with_provider();

        // No batch yet: lifecycle error even though the record is invalid.
        let bad = marker(&engine, 2000, 0, 1, 1);
        assert_eq!(
            state.submit_marker(&engine, &provider_ctx(0), bad).unwrap_err(),
            ProtocolError::BatchClosed(BatchId::NONE)
        );

        // Role check runs before everything else.
        assert_eq!(
            state.submit_marker(&engine, &outsider_ctx(0), bad).unwrap_err(),
            ProtocolError::NotProvider(outsider())
        );

        open(&mut state);
        state.pause(&owner_ctx(0)).unwrap();
        assert_eq!(
            state.submit_marker(&engine, &provider_ctx(0), bad).unwrap_err(),
            ProtocolError::Paused
        );
    }

    #[test]
    fn test_capacity_limit() {
        let engine = LocalEngine::new();
        let mut state = new_state_with_provider();
        state.set_capacity(&owner_ctx(0), RecordKind::Marker, 2).unwrap();
        open(&mut state);

        let mut now = 0;
        for _ in 0..2 {
            state
                .submit_marker(&engine, &provider_ctx(now), marker(&engine, 1, 1, 1, 1))
                .unwrap();
            now += TEST_COOLDOWN;
        }
        assert_eq!(
            state
                .submit_marker(&engine, &provider_ctx(now), marker(&engine, 1, 1, 1, 1))
                .unwrap_err(),
            ProtocolError::MaxMarkersReached {
                batch: BatchId(1),
                max: 2
            }
        );
        assert_eq!(state.marker_count(BatchId(1)).unwrap(), 2);

        // Commands have their own limit.
        assert!(state
            .submit_command(&engine, &provider_ctx(now), command(&engine, 1, 1, 1, 0))
            .is_ok());
    }

    #[test]
    fn test_submission_cooldown() {
        let engine = LocalEngine::new();
        let mut state = new_state_with_provider();
        open(&mut state);

        state
            .submit_marker(&engine, &provider_ctx(100), marker(&engine, 1, 1, 1, 1))
            .unwrap();
        assert_eq!(
            state
                .submit_command(&engine, &provider_ctx(101), command(&engine, 1, 1, 1, 0))
                .unwrap_err(),
            ProtocolError::CooldownActive {
                action: ActionClass::Submission,
                remaining_secs: TEST_COOLDOWN - 1
            }
        );

        // Other submitters are unaffected.
        assert!(state
            .submit_marker(&engine, &owner_ctx(101), marker(&engine, 1, 1, 1, 1))
            .is_ok());

        assert!(state
            .submit_command(
                &engine,
                &provider_ctx(100 + TEST_COOLDOWN),
                command(&engine, 1, 1, 1, 0)
            )
            .is_ok());
    }

    #[test]
    fn test_closed_batch_rejects_append() {
        let engine = LocalEngine::new();
        let mut state = new_state_with_provider();
        open(&mut state);
        state.close_batch(&owner_ctx(0)).unwrap();

        assert_eq!(
            state
                .submit_marker(&engine, &provider_ctx(0), marker(&engine, 1, 1, 1, 1))
                .unwrap_err(),
            ProtocolError::BatchClosed(BatchId(1))
        );
        assert_eq!(state.marker_count(BatchId(1)).unwrap(), 0);
    }
}

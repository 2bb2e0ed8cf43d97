//! Decryption oracle bridge
//!
//! A decryption request and its callback are two separate operations. The
//! only link between them is the context table, keyed by the request id the
//! oracle hands out. A callback is accepted only if the context exists, has
//! not been processed, the referenced batch still has the committed content,
//! and the proof verifies. Only then are the cleartexts released.

use std::collections::BTreeMap;

use cipherbatch_fhe::CiphertextHandle;
use cipherbatch_hash::{DomainHasher, ORACLE_PROOF_CONTEXT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::commitment::BatchCommitment;
use crate::errors::{ProtocolError, ProtocolResult};
use crate::events::{ProtocolEvent, Receipt};
use crate::state::ProtocolState;
use crate::types::{ActionClass, BatchId, CallContext, Identity, InstanceId, RequestId};

/// What the oracle is asked to decrypt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionRequest {
    pub instance: InstanceId,
    pub batch_id: BatchId,
    pub commitment: BatchCommitment,
    /// Every handle of the batch, in commitment order
    pub handles: Vec<CiphertextHandle>,
}

/// Outbound side of the oracle boundary
pub trait DecryptionOracle {
    /// Enqueue a request and return the id the answer will carry.
    ///
    /// Transport failures map to [`ProtocolError::OracleUnavailable`].
    fn submit(&self, request: DecryptionRequest) -> ProtocolResult<RequestId>;
}

/// The statement an oracle proof attests to
#[derive(Clone, Copy, Debug)]
pub struct ProofStatement<'a> {
    pub instance: &'a InstanceId,
    pub request_id: RequestId,
    pub batch_id: BatchId,
    pub commitment: &'a BatchCommitment,
    pub cleartexts: &'a [u64],
}

impl ProofStatement<'_> {
    /// Digest signed by the oracle
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = DomainHasher::new(ORACLE_PROOF_CONTEXT);
        hasher
            .update(self.instance.as_bytes())
            .update_u64(self.request_id.0)
            .update_u64(self.batch_id.0)
            .update(self.commitment.as_bytes())
            .update_u64(self.cleartexts.len() as u64);
        for value in self.cleartexts {
            hasher.update_u64(*value);
        }
        hasher.finalize()
    }
}

/// The oracle's own proof verification primitive
pub trait ProofVerifier {
    fn verify(&self, statement: &ProofStatement<'_>, proof: &[u8]) -> bool;
}

/// A pending or answered decryption request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionContext {
    pub request_id: RequestId,
    pub batch_id: BatchId,
    /// Commitment over the batch at request time
    pub state_hash: BatchCommitment,
    pub processed: bool,
    pub requested_by: Identity,
    pub requested_at: u64,
    pub processed_at: Option<u64>,
    /// Verified cleartexts, once processed
    pub cleartexts: Option<Vec<u64>>,
}

/// Result of an accepted callback
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptionOutcome {
    pub request_id: RequestId,
    pub batch_id: BatchId,
    pub cleartexts: Vec<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContextTable {
    contexts: BTreeMap<RequestId, DecryptionContext>,
}

impl ContextTable {
    pub fn get(&self, id: RequestId) -> Option<&DecryptionContext> {
        self.contexts.get(&id)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Evict by age, then the oldest processed contexts beyond `max_contexts`
    fn prune(&mut self, now: u64, max_age_secs: Option<u64>, max_contexts: usize) -> usize {
        let before = self.contexts.len();

        if let Some(max_age) = max_age_secs {
            self.contexts
                .retain(|_, c| now.saturating_sub(c.requested_at) <= max_age);
        }

        let excess = self.contexts.len().saturating_sub(max_contexts);
        if excess > 0 {
            let mut processed: Vec<(u64, RequestId)> = self
                .contexts
                .values()
                .filter(|c| c.processed)
                .map(|c| (c.requested_at, c.request_id))
                .collect();
            processed.sort_unstable();
            for (_, id) in processed.into_iter().take(excess) {
                self.contexts.remove(&id);
            }
        }

        before - self.contexts.len()
    }
}

impl ProtocolState {
    /// Ask the oracle to decrypt the current batch
    pub fn request_decryption<O: DecryptionOracle>(
        &mut self,
        oracle: &O,
        ctx: &CallContext,
    ) -> ProtocolResult<Receipt<RequestId>> {
        self.access.require_provider(&ctx.caller)?;
        self.access.require_unpaused()?;
        self.cooldowns.check(
            &ctx.caller,
            ActionClass::DecryptionRequest,
            self.config.cooldown_secs,
            ctx.now,
        )?;

        let batch = self
            .batches
            .current()
            .ok_or(ProtocolError::InvalidBatchId(BatchId::NONE))?;
        if batch.is_empty() {
            return Err(ProtocolError::EmptyBatch(batch.id));
        }

        let batch_id = batch.id;
        let commitment = BatchCommitment::of_batch(&self.instance, batch);
        let handles = batch
            .markers()
            .iter()
            .flat_map(|m| m.handles())
            .chain(batch.commands().iter().flat_map(|c| c.handles()))
            .collect();

        let request_id = oracle.submit(DecryptionRequest {
            instance: self.instance,
            batch_id,
            commitment,
            handles,
        })?;
        if self.contexts.contexts.contains_key(&request_id) {
            warn!(request = %request_id, "Oracle reissued a live request id");
            return Err(ProtocolError::DuplicateRequest(request_id));
        }

        self.contexts.contexts.insert(
            request_id,
            DecryptionContext {
                request_id,
                batch_id,
                state_hash: commitment,
                processed: false,
                requested_by: ctx.caller,
                requested_at: ctx.now,
                processed_at: None,
                cleartexts: None,
            },
        );
        self.cooldowns
            .touch(ctx.caller, ActionClass::DecryptionRequest, ctx.now);

        info!(request = %request_id, batch = %batch_id, %commitment, "Decryption requested");
        Ok(Receipt::with_event(
            request_id,
            ProtocolEvent::DecryptionRequested {
                request_id,
                batch_id,
                commitment,
            },
        ))
    }

    /// Accept an oracle answer.
    ///
    /// The caller identity is not checked; the proof is the authorization.
    pub fn on_decryption_callback<V: ProofVerifier>(
        &mut self,
        verifier: &V,
        ctx: &CallContext,
        request_id: RequestId,
        cleartexts: Vec<u64>,
        proof: &[u8],
    ) -> ProtocolResult<Receipt<DecryptionOutcome>> {
        let context = self
            .contexts
            .get(request_id)
            .ok_or(ProtocolError::UnknownRequest(request_id))?;
        if context.processed {
            debug!(request = %request_id, "Duplicate callback ignored");
            return Err(ProtocolError::ReplayAttempt(request_id));
        }

        let batch_id = context.batch_id;
        let current = self
            .batches
            .get(batch_id)
            .map(|batch| BatchCommitment::of_batch(&self.instance, batch));
        if current != Some(context.state_hash) {
            warn!(request = %request_id, batch = %batch_id, "Batch changed since decryption request");
            return Err(ProtocolError::StateMismatch {
                request: request_id,
                batch: batch_id,
            });
        }

        let statement = ProofStatement {
            instance: &self.instance,
            request_id,
            batch_id,
            commitment: &context.state_hash,
            cleartexts: &cleartexts,
        };
        if !verifier.verify(&statement, proof) {
            warn!(request = %request_id, batch = %batch_id, "Decryption proof rejected");
            return Err(ProtocolError::InvalidProof(request_id));
        }

        if let Some(context) = self.contexts.contexts.get_mut(&request_id) {
            context.processed = true;
            context.processed_at = Some(ctx.now);
            context.cleartexts = Some(cleartexts.clone());
        }

        info!(request = %request_id, batch = %batch_id, values = cleartexts.len(), "Decryption completed");
        Ok(Receipt::with_event(
            DecryptionOutcome {
                request_id,
                batch_id,
                cleartexts,
            },
            ProtocolEvent::DecryptionCompleted {
                request_id,
                batch_id,
            },
        ))
    }

    /// Apply the retention policy; returns how many contexts were evicted
    pub fn prune_contexts(&mut self, ctx: &CallContext) -> ProtocolResult<Receipt<usize>> {
        self.access.require_owner(&ctx.caller)?;
        let retention = &self.config.retention;
        let count = self
            .contexts
            .prune(ctx.now, retention.max_age_secs, retention.max_contexts);
        if count == 0 {
            return Ok(Receipt::quiet(0));
        }

        info!(count, remaining = self.contexts.len(), "Decryption contexts pruned");
        Ok(Receipt::with_event(count, ProtocolEvent::ContextsPruned { count }))
    }

    /// Look up a decryption context
    pub fn decryption_context(&self, id: RequestId) -> Option<&DecryptionContext> {
        self.contexts.get(id)
    }

    /// All retained contexts, by request id
    pub fn decryption_contexts(&self) -> impl Iterator<Item = &DecryptionContext> {
        self.contexts.contexts.values()
    }

    /// Highest request id held in the context table, answered or not
    pub fn last_request_id(&self) -> Option<RequestId> {
        self.contexts.contexts.keys().next_back().copied()
    }

    /// Contexts still waiting for a callback, by request id
    pub fn pending_requests(&self) -> impl Iterator<Item = &DecryptionContext> {
        self.contexts.contexts.values().filter(|c| !c.processed)
    }

    /// Commitment over the current content of a batch
    pub fn batch_commitment(&self, id: BatchId) -> ProtocolResult<BatchCommitment> {
        Ok(BatchCommitment::of_batch(&self.instance, self.batch(id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionPolicy;
    use crate::test_support::*;
    use cipherbatch_fhe::LocalEngine;

    /// Batch 1 with one marker and one command, closed
    fn scenario(engine: &LocalEngine) -> ProtocolState {
        let mut state = new_state_with_provider();
        state.open_batch(&owner_ctx(0)).unwrap();
        state
            .submit_marker(engine, &provider_ctx(0), marker(engine, 10, 15, 2, 5))
            .unwrap();
        state
            .submit_command(engine, &owner_ctx(0), command(engine, 10, 15, 1, 0))
            .unwrap();
        state.close_batch(&owner_ctx(1)).unwrap();
        state
    }

    fn sign(state: &ProtocolState, id: RequestId, cleartexts: &[u64]) -> Vec<u8> {
        let context = state.decryption_context(id).unwrap();
        ProofStatement {
            instance: state.instance(),
            request_id: id,
            batch_id: context.batch_id,
            commitment: &context.state_hash,
            cleartexts,
        }
        .digest()
        .to_vec()
    }

    #[test]
    fn test_request_and_callback() {
        let engine = LocalEngine::new();
        let oracle = RecordingOracle::default();
        let mut state = scenario(&engine);

        let receipt = state.request_decryption(&oracle, &provider_ctx(2)).unwrap();
        let id = receipt.output;
        let request = oracle.last().unwrap();
        assert_eq!(request.handles.len(), 8);
        assert_eq!(request.batch_id, BatchId(1));
        assert_eq!(request.commitment, state.batch_commitment(BatchId(1)).unwrap());
        assert_eq!(state.pending_requests().count(), 1);

        let cleartexts = vec![10, 15, 2, 5, 10, 15, 1, 0];
        let proof = sign(&state, id, &cleartexts);
        let done = state
            .on_decryption_callback(&DigestVerifier, &oracle_ctx(3), id, cleartexts.clone(), &proof)
            .unwrap();
        assert_eq!(done.output.cleartexts, cleartexts);
        assert_eq!(
            done.events,
            vec![ProtocolEvent::DecryptionCompleted {
                request_id: id,
                batch_id: BatchId(1)
            }]
        );

        let context = state.decryption_context(id).unwrap();
        assert!(context.processed);
        assert_eq!(context.processed_at, Some(3));
        assert_eq!(state.pending_requests().count(), 0);
    }

    #[test]
    fn test_replay_rejected() {
        let engine = LocalEngine::new();
        let oracle = RecordingOracle::default();
        let mut state = scenario(&engine);
        let id = state.request_decryption(&oracle, &provider_ctx(2)).unwrap().output;
        let proof = sign(&state, id, &[1]);

        state
            .on_decryption_callback(&DigestVerifier, &oracle_ctx(3), id, vec![1], &proof)
            .unwrap();
        let err = state
            .on_decryption_callback(&DigestVerifier, &oracle_ctx(4), id, vec![1], &proof)
            .unwrap_err();
        assert_eq!(err, ProtocolError::ReplayAttempt(id));
        assert!(err.is_benign_duplicate());
        assert_eq!(state.decryption_context(id).unwrap().processed_at, Some(3));
    }

    #[test]
    fn test_state_drift_rejected() {
        let engine = LocalEngine::new();
        let oracle = RecordingOracle::default();
        let mut state = new_state_with_provider();
        state.open_batch(&owner_ctx(0)).unwrap();
        state
            .submit_marker(&engine, &provider_ctx(0), marker(&engine, 1, 1, 1, 1))
            .unwrap();

        let id = state.request_decryption(&oracle, &provider_ctx(0)).unwrap().output;
        let proof = sign(&state, id, &[1, 1, 1, 1]);
        state
            .submit_marker(&engine, &owner_ctx(0), marker(&engine, 2, 2, 2, 2))
            .unwrap();

        let err = state
            .on_decryption_callback(&DigestVerifier, &oracle_ctx(1), id, vec![1, 1, 1, 1], &proof)
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::StateMismatch {
                request: id,
                batch: BatchId(1)
            }
        );
        assert!(err.class().is_security_relevant());
        assert!(!state.decryption_context(id).unwrap().processed);
    }

    #[test]
    fn test_bad_proof_rejected() {
        let engine = LocalEngine::new();
        let oracle = RecordingOracle::default();
        let mut state = scenario(&engine);
        let id = state.request_decryption(&oracle, &provider_ctx(2)).unwrap().output;

        // Proof over different cleartexts.
        let proof = sign(&state, id, &[9]);
        assert_eq!(
            state
                .on_decryption_callback(&DigestVerifier, &oracle_ctx(3), id, vec![1], &proof)
                .unwrap_err(),
            ProtocolError::InvalidProof(id)
        );
        assert!(!state.decryption_context(id).unwrap().processed);
    }

    #[test]
    fn test_unknown_request() {
        let mut state = new_state_with_provider();
        assert_eq!(
            state
                .on_decryption_callback(&DigestVerifier, &oracle_ctx(0), RequestId(77), vec![], &[])
                .unwrap_err(),
            ProtocolError::UnknownRequest(RequestId(77))
        );
    }

    #[test]
    fn test_request_preconditions() {
        let engine = LocalEngine::new();
        let oracle = RecordingOracle::default();
        let mut state = new_state_with_provider();

        assert_eq!(
            state.request_decryption(&oracle, &provider_ctx(0)).unwrap_err(),
            ProtocolError::InvalidBatchId(BatchId::NONE)
        );

        state.open_batch(&owner_ctx(0)).unwrap();
        assert_eq!(
            state.request_decryption(&oracle, &provider_ctx(0)).unwrap_err(),
            ProtocolError::EmptyBatch(BatchId(1))
        );

        state
            .submit_marker(&engine, &provider_ctx(0), marker(&engine, 1, 1, 1, 1))
            .unwrap();
        state.request_decryption(&oracle, &provider_ctx(0)).unwrap();
        assert_eq!(
            state.request_decryption(&oracle, &provider_ctx(1)).unwrap_err(),
            ProtocolError::CooldownActive {
                action: ActionClass::DecryptionRequest,
                remaining_secs: TEST_COOLDOWN - 1
            }
        );
        assert_eq!(oracle.count(), 1);
    }

    #[test]
    fn test_oracle_failure_leaves_state_untouched() {
        let engine = LocalEngine::new();
        let mut state = scenario(&engine);

        let err = state
            .request_decryption(&UnavailableOracle, &provider_ctx(2))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::OracleUnavailable(_)));
        assert_eq!(state.pending_requests().count(), 0);
        assert_eq!(state.last_action(&provider(), ActionClass::DecryptionRequest), None);
    }

    #[test]
    fn test_duplicate_request_id() {
        let engine = LocalEngine::new();
        let mut state = scenario(&engine);
        let oracle = FixedIdOracle(RequestId(5));

        state.request_decryption(&oracle, &provider_ctx(2)).unwrap();
        assert_eq!(
            state.request_decryption(&oracle, &owner_ctx(2)).unwrap_err(),
            ProtocolError::DuplicateRequest(RequestId(5))
        );
        assert_eq!(state.last_action(&owner(), ActionClass::DecryptionRequest), None);
    }

    #[test]
    fn test_last_request_id_tracks_table() {
        let engine = LocalEngine::new();
        let mut state = scenario(&engine);
        assert_eq!(state.last_request_id(), None);

        state.request_decryption(&FixedIdOracle(RequestId(9)), &provider_ctx(2)).unwrap();
        state.request_decryption(&FixedIdOracle(RequestId(4)), &owner_ctx(2)).unwrap();
        assert_eq!(state.last_request_id(), Some(RequestId(9)));

        let restored = ProtocolState::from_bytes(&state.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.last_request_id(), Some(RequestId(9)));
    }

    #[test]
    fn test_prune_by_age_and_count() {
        let engine = LocalEngine::new();
        let oracle = RecordingOracle::default();
        let mut state = scenario(&engine);
        state.config.retention = RetentionPolicy {
            max_contexts: 1,
            max_age_secs: Some(1_000),
        };

        let old = state.request_decryption(&oracle, &provider_ctx(0)).unwrap().output;
        let answered = state.request_decryption(&oracle, &owner_ctx(500)).unwrap().output;
        let proof = sign(&state, answered, &[]);
        state
            .on_decryption_callback(&DigestVerifier, &oracle_ctx(501), answered, vec![], &proof)
            .unwrap();
        let pending = state
            .request_decryption(&oracle, &provider_ctx(900))
            .unwrap()
            .output;

        assert_eq!(
            state.prune_contexts(&provider_ctx(1_200)).unwrap_err(),
            ProtocolError::NotOwner(provider())
        );

        let receipt = state.prune_contexts(&owner_ctx(1_200)).unwrap();
        assert_eq!(receipt.output, 2);
        assert_eq!(receipt.events, vec![ProtocolEvent::ContextsPruned { count: 2 }]);
        assert!(state.decryption_context(old).is_none());
        assert!(state.decryption_context(answered).is_none());
        assert!(state.decryption_context(pending).is_some());

        assert_eq!(
            state
                .on_decryption_callback(&DigestVerifier, &oracle_ctx(1_201), old, vec![], &[])
                .unwrap_err(),
            ProtocolError::UnknownRequest(old)
        );
        assert!(state.prune_contexts(&owner_ctx(1_200)).unwrap().events.is_empty());
    }
}

//! A protocol instance bound to its collaborators

use cipherbatch_fhe::FheEngine;

use crate::bridge::{DecryptionOracle, DecryptionOutcome, ProofVerifier};
use crate::config::ProtocolConfig;
use crate::errors::ProtocolResult;
use crate::events::Receipt;
use crate::records::{Command, Marker};
use crate::state::ProtocolState;
use crate::types::{CallContext, Identity, InstanceId, RequestId};

/// State plus the engine, oracle and verifier it is operated with
///
/// Administrative operations need no collaborator and are reached through
/// [`Protocol::state_mut`].
#[derive(Debug)]
pub struct Protocol<E, O, V> {
    state: ProtocolState,
    engine: E,
    oracle: O,
    verifier: V,
}

impl<E, O, V> Protocol<E, O, V>
where
    E: FheEngine,
    O: DecryptionOracle,
    V: ProofVerifier,
{
    /// Wrap an existing state (e.g. restored from a snapshot)
    pub fn new(state: ProtocolState, engine: E, oracle: O, verifier: V) -> Self {
        Self {
            state,
            engine,
            oracle,
            verifier,
        }
    }

    /// Initialize a fresh instance; the deployer becomes the owner
    pub fn deploy(
        deployer: Identity,
        nonce: u64,
        config: ProtocolConfig,
        now: u64,
        engine: E,
        oracle: O,
        verifier: V,
    ) -> ProtocolResult<Self> {
        let instance = InstanceId::derive(&deployer, nonce);
        let state = ProtocolState::new(instance, deployer, config, now)?;
        Ok(Self::new(state, engine, oracle, verifier))
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ProtocolState {
        &mut self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn submit_marker(&mut self, ctx: &CallContext, marker: Marker) -> ProtocolResult<Receipt<u32>> {
        self.state.submit_marker(&self.engine, ctx, marker)
    }

    pub fn submit_command(
        &mut self,
        ctx: &CallContext,
        command: Command,
    ) -> ProtocolResult<Receipt<u32>> {
        self.state.submit_command(&self.engine, ctx, command)
    }

    pub fn request_decryption(&mut self, ctx: &CallContext) -> ProtocolResult<Receipt<RequestId>> {
        self.state.request_decryption(&self.oracle, ctx)
    }

    pub fn on_decryption_callback(
        &mut self,
        ctx: &CallContext,
        request_id: RequestId,
        cleartexts: Vec<u64>,
        proof: &[u8],
    ) -> ProtocolResult<Receipt<DecryptionOutcome>> {
        self.state
            .on_decryption_callback(&self.verifier, ctx, request_id, cleartexts, proof)
    }

    /// Release the state, e.g. for persistence
    pub fn into_state(self) -> ProtocolState {
        self.state
    }
}

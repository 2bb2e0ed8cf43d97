//! The protocol state aggregate
//!
//! Everything an instance knows lives in one [`ProtocolState`]. Operations are
//! methods on it (spread over the component modules) and take `&mut self`, so
//! the single-writer rule is enforced by the borrow checker rather than by
//! locks. Persistence is an explicit bincode snapshot.

use serde::{Deserialize, Serialize};

use crate::access::{AccessControl, CooldownLedger};
use crate::batch::BatchLedger;
use crate::bridge::ContextTable;
use crate::config::ProtocolConfig;
use crate::errors::{ProtocolError, ProtocolResult};
use crate::types::{ActionClass, Identity, InstanceId};

/// Snapshot format version
pub const SNAPSHOT_VERSION: u16 = 1;

/// Complete state of one protocol instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolState {
    pub(crate) instance: InstanceId,
    pub(crate) config: ProtocolConfig,
    pub(crate) access: AccessControl,
    pub(crate) cooldowns: CooldownLedger,
    pub(crate) batches: BatchLedger,
    pub(crate) contexts: ContextTable,
    pub(crate) created_at: u64,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u16,
    state: &'a ProtocolState,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u16,
    state: ProtocolState,
}

impl ProtocolState {
    /// Initialize a new instance owned by `owner`
    pub fn new(
        instance: InstanceId,
        owner: Identity,
        config: ProtocolConfig,
        now: u64,
    ) -> ProtocolResult<Self> {
        config.validate()?;
        Ok(Self {
            instance,
            access: AccessControl::new(owner),
            config,
            cooldowns: CooldownLedger::default(),
            batches: BatchLedger::default(),
            contexts: ContextTable::default(),
            created_at: now,
        })
    }

    /// Instance identity
    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Current parameters
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Creation time
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Current owner
    pub fn owner(&self) -> Identity {
        self.access.owner()
    }

    /// True if `id` holds the provider role
    pub fn is_provider(&self, id: &Identity) -> bool {
        self.access.is_provider(id)
    }

    /// All providers, in identity order
    pub fn providers(&self) -> impl Iterator<Item = &Identity> {
        self.access.providers()
    }

    /// True while paused
    pub fn is_paused(&self) -> bool {
        self.access.is_paused()
    }

    /// Current cooldown
    pub fn cooldown_secs(&self) -> u64 {
        self.config.cooldown_secs
    }

    /// Last recorded action time of `id` in `action`
    pub fn last_action(&self, id: &Identity, action: ActionClass) -> Option<u64> {
        self.cooldowns.last(id, action)
    }

    /// Serialize state for persistence
    pub fn to_bytes(&self) -> ProtocolResult<Vec<u8>> {
        let snapshot = SnapshotRef {
            version: SNAPSHOT_VERSION,
            state: self,
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    /// Deserialize state from bytes
    pub fn from_bytes(data: &[u8]) -> ProtocolResult<Self> {
        let snapshot: Snapshot = bincode::deserialize(data)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(ProtocolError::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        snapshot.state.config.validate()?;
        Ok(snapshot.state)
    }
}

//! Access control: owner and provider roles, pause switch, cooldowns

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{ProtocolError, ProtocolResult};
use crate::events::{ProtocolEvent, Receipt};
use crate::state::ProtocolState;
use crate::types::{ActionClass, CallContext, Identity, RecordKind};

/// Role registry and pause switch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessControl {
    owner: Identity,
    providers: BTreeSet<Identity>,
    paused: bool,
}

impl AccessControl {
    /// Registry where the owner is the only provider
    pub fn new(owner: Identity) -> Self {
        let mut providers = BTreeSet::new();
        providers.insert(owner);
        Self {
            owner,
            providers,
            paused: false,
        }
    }

    pub fn owner(&self) -> Identity {
        self.owner
    }

    pub fn is_provider(&self, id: &Identity) -> bool {
        self.providers.contains(id)
    }

    pub fn providers(&self) -> impl Iterator<Item = &Identity> {
        self.providers.iter()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn require_owner(&self, caller: &Identity) -> ProtocolResult<()> {
        if *caller != self.owner {
            return Err(ProtocolError::NotOwner(*caller));
        }
        Ok(())
    }

    pub(crate) fn require_provider(&self, caller: &Identity) -> ProtocolResult<()> {
        if !self.is_provider(caller) {
            return Err(ProtocolError::NotProvider(*caller));
        }
        Ok(())
    }

    pub(crate) fn require_unpaused(&self) -> ProtocolResult<()> {
        if self.paused {
            return Err(ProtocolError::Paused);
        }
        Ok(())
    }
}

/// Last action time per caller, one clock per action class
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CooldownLedger {
    last: BTreeMap<(Identity, ActionClass), u64>,
}

impl CooldownLedger {
    /// Last recorded action, if any
    pub fn last(&self, id: &Identity, action: ActionClass) -> Option<u64> {
        self.last.get(&(*id, action)).copied()
    }

    /// Reject unless `now >= last + cooldown_secs`
    pub(crate) fn check(
        &self,
        id: &Identity,
        action: ActionClass,
        cooldown_secs: u64,
        now: u64,
    ) -> ProtocolResult<()> {
        let Some(last) = self.last(id, action) else {
            return Ok(());
        };
        let ready_at = last.saturating_add(cooldown_secs);
        if now < ready_at {
            return Err(ProtocolError::CooldownActive {
                action,
                remaining_secs: ready_at - now,
            });
        }
        Ok(())
    }

    pub(crate) fn touch(&mut self, id: Identity, action: ActionClass, now: u64) {
        self.last.insert((id, action), now);
    }
}

impl ProtocolState {
    /// Grant the provider role. No-op if already a provider.
    pub fn add_provider(&mut self, ctx: &CallContext, id: Identity) -> ProtocolResult<Receipt<()>> {
        self.access.require_owner(&ctx.caller)?;
        if !self.access.providers.insert(id) {
            return Ok(Receipt::quiet(()));
        }
        info!(provider = %id, "Provider added");
        Ok(Receipt::with_event((), ProtocolEvent::ProviderAdded { provider: id }))
    }

    /// Revoke the provider role. No-op if not a provider.
    ///
    /// Pending decryption requests issued by `id` stay valid.
    pub fn remove_provider(&mut self, ctx: &CallContext, id: Identity) -> ProtocolResult<Receipt<()>> {
        self.access.require_owner(&ctx.caller)?;
        if id == self.access.owner {
            return Err(ProtocolError::OwnerRoleProtected);
        }
        if !self.access.providers.remove(&id) {
            return Ok(Receipt::quiet(()));
        }
        info!(provider = %id, "Provider removed");
        Ok(Receipt::with_event((), ProtocolEvent::ProviderRemoved { provider: id }))
    }

    /// Hand the owner role to `new_owner`, who also becomes a provider
    pub fn transfer_ownership(
        &mut self,
        ctx: &CallContext,
        new_owner: Identity,
    ) -> ProtocolResult<Receipt<()>> {
        self.access.require_owner(&ctx.caller)?;
        let previous = self.access.owner;
        if new_owner == previous {
            return Ok(Receipt::quiet(()));
        }

        let mut events = Vec::with_capacity(2);
        if self.access.providers.insert(new_owner) {
            events.push(ProtocolEvent::ProviderAdded { provider: new_owner });
        }
        self.access.owner = new_owner;
        events.push(ProtocolEvent::OwnershipTransferred {
            previous,
            owner: new_owner,
        });

        info!(%previous, owner = %new_owner, "Ownership transferred");
        Ok(Receipt { output: (), events })
    }

    /// Stop all submissions, batch openings and decryption requests
    pub fn pause(&mut self, ctx: &CallContext) -> ProtocolResult<Receipt<()>> {
        self.access.require_owner(&ctx.caller)?;
        if self.access.paused {
            return Err(ProtocolError::AlreadyPaused);
        }
        self.access.paused = true;
        info!("Protocol paused");
        Ok(Receipt::with_event((), ProtocolEvent::Paused { by: ctx.caller }))
    }

    /// Resume operation. No-op if not paused.
    pub fn unpause(&mut self, ctx: &CallContext) -> ProtocolResult<Receipt<()>> {
        self.access.require_owner(&ctx.caller)?;
        if !self.access.paused {
            return Ok(Receipt::quiet(()));
        }
        self.access.paused = false;
        info!("Protocol unpaused");
        Ok(Receipt::with_event((), ProtocolEvent::Unpaused { by: ctx.caller }))
    }

    /// Change the cooldown shared by both action classes
    pub fn set_cooldown(&mut self, ctx: &CallContext, secs: u64) -> ProtocolResult<Receipt<()>> {
        self.access.require_owner(&ctx.caller)?;
        if secs == 0 {
            return Err(ProtocolError::InvalidCooldown);
        }
        let old_secs = self.config.cooldown_secs;
        if old_secs == secs {
            return Ok(Receipt::quiet(()));
        }
        self.config.cooldown_secs = secs;
        info!(old_secs, new_secs = secs, "Cooldown changed");
        Ok(Receipt::with_event(
            (),
            ProtocolEvent::CooldownChanged {
                old_secs,
                new_secs: secs,
            },
        ))
    }

    /// Change how many records of `kind` a batch may hold
    pub fn set_capacity(
        &mut self,
        ctx: &CallContext,
        kind: RecordKind,
        max: u32,
    ) -> ProtocolResult<Receipt<()>> {
        self.access.require_owner(&ctx.caller)?;
        if max == 0 {
            return Err(ProtocolError::InvalidCapacity(kind));
        }
        let slot = match kind {
            RecordKind::Marker => &mut self.config.max_markers_per_batch,
            RecordKind::Command => &mut self.config.max_commands_per_batch,
        };
        let old_max = *slot;
        if old_max == max {
            return Ok(Receipt::quiet(()));
        }
        *slot = max;
        info!(%kind, old_max, new_max = max, "Capacity changed");
        Ok(Receipt::with_event(
            (),
            ProtocolEvent::CapacityChanged {
                kind,
                old_max,
                new_max: max,
            },
        ))
    }
}

//! In-process engine
//!
//! Keeps plaintexts in a registry behind opaque handles and evaluates
//! comparisons on them directly. It has the same observable contract as a real
//! FHE backend (unknown or mistyped handles are rejected, comparison results
//! are fresh handles) and is what the tests, the CLI simulation and the
//! benchmarks run against.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::engine::{Decryptor, Encryptor, FheEngine};
use crate::handle::{CiphertextHandle, EncryptedBool, HandleKind};
use crate::{FHEConfig, FHEError, FHEResult};

#[derive(Clone, Copy, Debug)]
enum Slot {
    Uint(u64),
    Bool(bool),
}

impl Slot {
    fn kind(&self) -> HandleKind {
        match self {
            Slot::Uint(_) => HandleKind::Uint64,
            Slot::Bool(_) => HandleKind::Bool,
        }
    }
}

#[derive(Default)]
struct Registry {
    values: HashMap<CiphertextHandle, Slot>,
    sequence: u64,
}

/// Engine that stores values in memory behind handles
#[derive(Clone)]
pub struct LocalEngine {
    engine_id: [u8; 32],
    registry: Arc<RwLock<Registry>>,
}

impl LocalEngine {
    /// Create an engine with a random identity
    pub fn new() -> Self {
        Self::with_id(rand::random())
    }

    /// Create an engine from configuration
    pub fn with_config(config: &FHEConfig) -> FHEResult<Self> {
        config.validate()?;
        Ok(match config.seed {
            Some(seed) => Self::with_id(seed),
            None => Self::new(),
        })
    }

    /// Create an engine with a fixed identity (deterministic handles)
    pub fn with_id(engine_id: [u8; 32]) -> Self {
        Self {
            engine_id,
            registry: Arc::new(RwLock::new(Registry::default())),
        }
    }

    /// Engine identity
    pub fn engine_id(&self) -> &[u8; 32] {
        &self.engine_id
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.registry.read().values.len()
    }

    /// True if no value has been produced yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn allocate(&self, slot: Slot) -> CiphertextHandle {
        let mut registry = self.registry.write();
        let handle = CiphertextHandle::derive(&self.engine_id, registry.sequence, slot.kind());
        registry.sequence += 1;
        registry.values.insert(handle, slot);
        handle
    }

    fn slot(&self, handle: &CiphertextHandle) -> FHEResult<Slot> {
        self.registry
            .read()
            .values
            .get(handle)
            .copied()
            .ok_or_else(|| FHEError::UnknownHandle(handle.to_hex()))
    }

    fn uint(&self, handle: &CiphertextHandle) -> FHEResult<u64> {
        match self.slot(handle)? {
            Slot::Uint(v) => Ok(v),
            other => Err(FHEError::TypeMismatch {
                expected: HandleKind::Uint64,
                found: other.kind(),
            }),
        }
    }

    fn boolean(&self, value: &EncryptedBool) -> FHEResult<bool> {
        match self.slot(value.handle())? {
            Slot::Bool(b) => Ok(b),
            other => Err(FHEError::TypeMismatch {
                expected: HandleKind::Bool,
                found: other.kind(),
            }),
        }
    }

    /// Encrypt a boolean (used to model externally produced predicates)
    pub fn encrypt_bool(&self, value: bool) -> EncryptedBool {
        EncryptedBool::from_handle(self.allocate(Slot::Bool(value)))
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("engine_id", &hex::encode(&self.engine_id[..8]))
            .field("values", &self.len())
            .finish()
    }
}

impl FheEngine for LocalEngine {
    fn is_initialized(&self, handle: &CiphertextHandle) -> bool {
        !handle.is_zero() && matches!(self.slot(handle), Ok(Slot::Uint(_)))
    }

    fn is_bool_initialized(&self, value: &EncryptedBool) -> bool {
        !value.handle().is_zero() && matches!(self.slot(value.handle()), Ok(Slot::Bool(_)))
    }

    fn ge_scalar(&self, handle: &CiphertextHandle, bound: u64) -> FHEResult<EncryptedBool> {
        let v = self.uint(handle)?;
        Ok(self.encrypt_bool(v >= bound))
    }

    fn le_scalar(&self, handle: &CiphertextHandle, bound: u64) -> FHEResult<EncryptedBool> {
        let v = self.uint(handle)?;
        Ok(self.encrypt_bool(v <= bound))
    }

    fn and(&self, a: &EncryptedBool, b: &EncryptedBool) -> FHEResult<EncryptedBool> {
        let a = self.boolean(a)?;
        let b = self.boolean(b)?;
        Ok(self.encrypt_bool(a && b))
    }

    fn reveal_gate(&self, predicate: &EncryptedBool) -> FHEResult<bool> {
        self.boolean(predicate)
    }

    fn release(&self, value: &EncryptedBool) {
        let mut registry = self.registry.write();
        if matches!(registry.values.get(value.handle()), Some(Slot::Bool(_))) {
            registry.values.remove(value.handle());
        }
    }
}

impl Encryptor for LocalEngine {
    fn encrypt(&self, value: u64) -> FHEResult<CiphertextHandle> {
        Ok(self.allocate(Slot::Uint(value)))
    }
}

impl Decryptor for LocalEngine {
    fn decrypt(&self, handle: &CiphertextHandle) -> FHEResult<u64> {
        match self.slot(handle) {
            Ok(Slot::Uint(v)) => Ok(v),
            Ok(Slot::Bool(b)) => Ok(b as u64),
            Err(e) => Err(FHEError::DecryptionFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let engine = LocalEngine::new();
        let h = engine.encrypt(12345).unwrap();
        assert_eq!(engine.decrypt(&h).unwrap(), 12345);
        assert!(engine.is_initialized(&h));
    }

    #[test]
    fn test_unknown_and_zero_handles_are_uninitialized() {
        let engine = LocalEngine::new();
        assert!(!engine.is_initialized(&CiphertextHandle::ZERO));
        assert!(!engine.is_initialized(&CiphertextHandle::from_bytes([7u8; 32])));
    }

    #[test]
    fn test_other_engine_handles_are_unknown() {
        let a = LocalEngine::with_id([1u8; 32]);
        let b = LocalEngine::with_id([2u8; 32]);
        let h = a.encrypt(5).unwrap();
        assert!(!b.is_initialized(&h));
        assert!(matches!(b.le_scalar(&h, 10), Err(FHEError::UnknownHandle(_))));
    }

    #[test]
    fn test_range_predicate() {
        let engine = LocalEngine::new();
        let inside = engine.encrypt(1000).unwrap();
        let outside = engine.encrypt(1001).unwrap();

        let p = engine.in_range(&inside, 0, 1000).unwrap();
        assert!(engine.is_bool_initialized(&p));
        assert!(engine.reveal_gate(&p).unwrap());

        let q = engine.in_range(&outside, 0, 1000).unwrap();
        assert!(!engine.reveal_gate(&q).unwrap());
    }

    #[test]
    fn test_range_predicate_keeps_only_result() {
        let engine = LocalEngine::new();
        let h = engine.encrypt(7).unwrap();
        assert_eq!(engine.len(), 1);

        let p = engine.in_range(&h, 0, 10).unwrap();
        assert_eq!(engine.len(), 2);

        engine.release(&p);
        assert_eq!(engine.len(), 1);
        assert!(!engine.is_bool_initialized(&p));
    }

    #[test]
    fn test_release_ignores_integers() {
        let engine = LocalEngine::new();
        let h = engine.encrypt(3).unwrap();
        engine.release(&EncryptedBool::from_handle(h));
        assert!(engine.is_initialized(&h));
        assert_eq!(engine.decrypt(&h).unwrap(), 3);
    }

    #[test]
    fn test_bool_is_not_an_integer() {
        let engine = LocalEngine::new();
        let b = engine.encrypt_bool(true);
        assert!(!engine.is_initialized(b.handle()));
        assert!(matches!(
            engine.ge_scalar(b.handle(), 0),
            Err(FHEError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_integer_is_not_a_predicate() {
        let engine = LocalEngine::new();
        let h = engine.encrypt(1).unwrap();
        let fake = EncryptedBool::from_handle(h);
        assert!(!engine.is_bool_initialized(&fake));
        assert!(engine.reveal_gate(&fake).is_err());
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let config = FHEConfig {
            seed: Some([4u8; 32]),
            ..FHEConfig::default()
        };
        let a = LocalEngine::with_config(&config).unwrap();
        let b = LocalEngine::with_config(&config).unwrap();
        assert_eq!(a.encrypt(1).unwrap(), b.encrypt(99).unwrap());
    }
}

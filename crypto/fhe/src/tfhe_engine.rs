//! TFHE-rs backed engine
//!
//! Values are real TFHE ciphertexts kept in a registry behind handles. The
//! engine holds the client key, so `reveal_gate` and `decrypt` are the trusted
//! boundary; everything else is evaluated homomorphically with the server key.
//!
//! TFHE-rs binds the server key per thread. Call [`TfheEngine::install`] on
//! every thread that evaluates predicates.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tfhe::prelude::*;
use tfhe::{generate_keys, ClientKey, ConfigBuilder, FheBool, FheUint64, ServerKey};

use crate::engine::{Decryptor, Encryptor, FheEngine};
use crate::handle::{CiphertextHandle, EncryptedBool, HandleKind};
use crate::{FHEConfig, FHEError, FHEResult};

enum Stored {
    Uint(FheUint64),
    Bool(FheBool),
}

impl Stored {
    fn kind(&self) -> HandleKind {
        match self {
            Stored::Uint(_) => HandleKind::Uint64,
            Stored::Bool(_) => HandleKind::Bool,
        }
    }
}

#[derive(Default)]
struct Registry {
    values: HashMap<CiphertextHandle, Stored>,
    sequence: u64,
}

/// Engine over TFHE-rs `FheUint64` / `FheBool`
#[derive(Clone)]
pub struct TfheEngine {
    engine_id: [u8; 32],
    client_key: Arc<ClientKey>,
    server_key: Arc<ServerKey>,
    registry: Arc<RwLock<Registry>>,
}

impl TfheEngine {
    /// Generate fresh keys and install the server key on the calling thread
    pub fn generate(config: &FHEConfig) -> FHEResult<Self> {
        config.validate()?;
        let tfhe_config = if config.security_bits >= 128 {
            ConfigBuilder::default().build()
        } else {
            // Lower security for testing
            ConfigBuilder::default_with_small_encryption().build()
        };
        let (client_key, server_key) = generate_keys(tfhe_config);

        let engine = Self {
            engine_id: config.seed.unwrap_or_else(rand::random),
            client_key: Arc::new(client_key),
            server_key: Arc::new(server_key),
            registry: Arc::new(RwLock::new(Registry::default())),
        };
        engine.install();
        Ok(engine)
    }

    /// Bind the server key to the current thread
    pub fn install(&self) {
        tfhe::set_server_key((*self.server_key).clone());
    }

    fn insert(&self, value: Stored) -> CiphertextHandle {
        let mut registry = self.registry.write();
        let handle = CiphertextHandle::derive(&self.engine_id, registry.sequence, value.kind());
        registry.sequence += 1;
        registry.values.insert(handle, value);
        handle
    }

    fn with_uint<T>(
        &self,
        handle: &CiphertextHandle,
        f: impl FnOnce(&FheUint64) -> T,
    ) -> FHEResult<T> {
        let registry = self.registry.read();
        match registry.values.get(handle) {
            Some(Stored::Uint(ct)) => Ok(f(ct)),
            Some(other) => Err(FHEError::TypeMismatch {
                expected: HandleKind::Uint64,
                found: other.kind(),
            }),
            None => Err(FHEError::UnknownHandle(handle.to_hex())),
        }
    }

    fn with_bool<T>(&self, value: &EncryptedBool, f: impl FnOnce(&FheBool) -> T) -> FHEResult<T> {
        let registry = self.registry.read();
        match registry.values.get(value.handle()) {
            Some(Stored::Bool(ct)) => Ok(f(ct)),
            Some(other) => Err(FHEError::TypeMismatch {
                expected: HandleKind::Bool,
                found: other.kind(),
            }),
            None => Err(FHEError::UnknownHandle(value.handle().to_hex())),
        }
    }

    fn kind_of(&self, handle: &CiphertextHandle) -> Option<HandleKind> {
        self.registry.read().values.get(handle).map(Stored::kind)
    }
}

impl std::fmt::Debug for TfheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TfheEngine")
            .field("engine_id", &hex::encode(&self.engine_id[..8]))
            .finish()
    }
}

impl FheEngine for TfheEngine {
    fn is_initialized(&self, handle: &CiphertextHandle) -> bool {
        !handle.is_zero() && self.kind_of(handle) == Some(HandleKind::Uint64)
    }

    fn is_bool_initialized(&self, value: &EncryptedBool) -> bool {
        !value.handle().is_zero() && self.kind_of(value.handle()) == Some(HandleKind::Bool)
    }

    fn ge_scalar(&self, handle: &CiphertextHandle, bound: u64) -> FHEResult<EncryptedBool> {
        let result = self.with_uint(handle, |ct| ct.ge(bound))?;
        Ok(EncryptedBool::from_handle(self.insert(Stored::Bool(result))))
    }

    fn le_scalar(&self, handle: &CiphertextHandle, bound: u64) -> FHEResult<EncryptedBool> {
        let result = self.with_uint(handle, |ct| ct.le(bound))?;
        Ok(EncryptedBool::from_handle(self.insert(Stored::Bool(result))))
    }

    fn and(&self, a: &EncryptedBool, b: &EncryptedBool) -> FHEResult<EncryptedBool> {
        let lhs = self.with_bool(a, |ct| ct.clone())?;
        let result = self.with_bool(b, |rhs| &lhs & rhs)?;
        Ok(EncryptedBool::from_handle(self.insert(Stored::Bool(result))))
    }

    fn reveal_gate(&self, predicate: &EncryptedBool) -> FHEResult<bool> {
        self.with_bool(predicate, |ct| ct.decrypt(&self.client_key))
    }

    fn release(&self, value: &EncryptedBool) {
        let mut registry = self.registry.write();
        if matches!(registry.values.get(value.handle()), Some(Stored::Bool(_))) {
            registry.values.remove(value.handle());
        }
    }
}

impl Encryptor for TfheEngine {
    fn encrypt(&self, value: u64) -> FHEResult<CiphertextHandle> {
        let ct = FheUint64::try_encrypt(value, &*self.client_key)
            .map_err(|e| FHEError::EncryptionFailed(e.to_string()))?;
        Ok(self.insert(Stored::Uint(ct)))
    }
}

impl Decryptor for TfheEngine {
    fn decrypt(&self, handle: &CiphertextHandle) -> FHEResult<u64> {
        let registry = self.registry.read();
        match registry.values.get(handle) {
            Some(Stored::Uint(ct)) => Ok(ct.decrypt(&self.client_key)),
            Some(Stored::Bool(ct)) => {
                let b: bool = ct.decrypt(&self.client_key);
                Ok(b as u64)
            }
            None => Err(FHEError::DecryptionFailed(handle.to_hex())),
        }
    }
}

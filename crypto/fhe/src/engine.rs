//! Engine capability traits
//!
//! The protocol never sees plaintext. Everything it needs from an FHE backend
//! is listed in [`FheEngine`]; the oracle side additionally needs
//! [`Decryptor`], and clients need [`Encryptor`].

use crate::handle::{CiphertextHandle, EncryptedBool};
use crate::FHEResult;

/// Homomorphic capabilities used by validity gates
pub trait FheEngine {
    /// True if `handle` references an integer value this engine produced
    fn is_initialized(&self, handle: &CiphertextHandle) -> bool;

    /// True if `value` references a boolean this engine produced
    fn is_bool_initialized(&self, value: &EncryptedBool) -> bool;

    /// Encrypted `handle >= bound`
    fn ge_scalar(&self, handle: &CiphertextHandle, bound: u64) -> FHEResult<EncryptedBool>;

    /// Encrypted `handle <= bound`
    fn le_scalar(&self, handle: &CiphertextHandle, bound: u64) -> FHEResult<EncryptedBool>;

    /// Encrypted logical AND
    fn and(&self, a: &EncryptedBool, b: &EncryptedBool) -> FHEResult<EncryptedBool>;

    /// Resolve a predicate to a control-flow bit.
    ///
    /// This is the engine's trusted evaluation boundary: only the single
    /// predicate bit leaves the engine, never the operands.
    fn reveal_gate(&self, predicate: &EncryptedBool) -> FHEResult<bool>;

    /// Drop an intermediate boolean. Unknown handles and integers are ignored.
    fn release(&self, _value: &EncryptedBool) {}

    /// Encrypted `min <= handle <= max`
    fn in_range(&self, handle: &CiphertextHandle, min: u64, max: u64) -> FHEResult<EncryptedBool> {
        let lower = self.ge_scalar(handle, min)?;
        let upper = match self.le_scalar(handle, max) {
            Ok(upper) => upper,
            Err(e) => {
                self.release(&lower);
                return Err(e);
            }
        };
        let result = self.and(&lower, &upper);
        self.release(&lower);
        self.release(&upper);
        result
    }
}

/// Client-side encryption of integers
pub trait Encryptor {
    /// Encrypt a value and return its handle
    fn encrypt(&self, value: u64) -> FHEResult<CiphertextHandle>;
}

/// Oracle-side decryption
pub trait Decryptor {
    /// Decrypt the value behind `handle`; booleans decrypt to 0 or 1
    fn decrypt(&self, handle: &CiphertextHandle) -> FHEResult<u64>;
}

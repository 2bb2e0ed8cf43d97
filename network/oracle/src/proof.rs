//! Threshold committee proofs
//!
//! A proof is a set of ed25519 signatures over [`ProofStatement::digest`],
//! each tagged with the signer's index in the committee. It verifies when at
//! least `threshold` distinct members signed correctly.

use std::collections::BTreeSet;

use cipherbatch_hash::keyed_hash;
use cipherbatch_protocol::{ProofStatement, ProofVerifier};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{OracleError, OracleResult};

/// One member's signature
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSignature {
    pub member: u16,
    /// 64-byte ed25519 signature
    pub signature: Vec<u8>,
}

/// Wire form of a committee proof
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleProof {
    pub signatures: Vec<MemberSignature>,
}

impl OracleProof {
    pub fn to_bytes(&self) -> OracleResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> OracleResult<Self> {
        bincode::deserialize(data).map_err(|e| OracleError::MalformedProof(e.to_string()))
    }
}

/// Signing side: the committee's secret keys
pub struct Committee {
    members: Vec<SigningKey>,
    threshold: u16,
}

impl Committee {
    /// Committee with fresh random keys
    pub fn generate(size: u16, threshold: u16) -> OracleResult<Self> {
        let members = (0..size).map(|_| SigningKey::generate(&mut OsRng)).collect();
        Self::from_keys(members, threshold)
    }

    /// Deterministic committee derived from a seed
    pub fn from_seed(seed: &[u8; 32], size: u16, threshold: u16) -> OracleResult<Self> {
        let members = (0..size)
            .map(|i| SigningKey::from_bytes(&keyed_hash(seed, &i.to_le_bytes())))
            .collect();
        Self::from_keys(members, threshold)
    }

    pub fn from_keys(members: Vec<SigningKey>, threshold: u16) -> OracleResult<Self> {
        if threshold == 0 {
            return Err(OracleError::InvalidCommittee("threshold must be positive".into()));
        }
        if members.len() > u16::MAX as usize || threshold as usize > members.len() {
            return Err(OracleError::InvalidCommittee(format!(
                "threshold {} with {} members",
                threshold,
                members.len()
            )));
        }
        Ok(Self { members, threshold })
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    /// Sign with the first `threshold` members
    pub fn sign(&self, statement: &ProofStatement<'_>) -> OracleProof {
        self.sign_with(statement, 0..self.threshold)
    }

    /// Sign with a chosen subset of members; out-of-range indices are skipped
    pub fn sign_with(
        &self,
        statement: &ProofStatement<'_>,
        members: impl IntoIterator<Item = u16>,
    ) -> OracleProof {
        let digest = statement.digest();
        let signatures = members
            .into_iter()
            .filter_map(|i| {
                let key = self.members.get(i as usize)?;
                Some(MemberSignature {
                    member: i,
                    signature: key.sign(&digest).to_bytes().to_vec(),
                })
            })
            .collect();
        OracleProof { signatures }
    }

    /// Public half, for the protocol host
    pub fn verifier(&self) -> CommitteeVerifier {
        CommitteeVerifier {
            members: self.members.iter().map(|k| k.verifying_key()).collect(),
            threshold: self.threshold,
        }
    }
}

impl std::fmt::Debug for Committee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Committee")
            .field("size", &self.members.len())
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// Verifying side: the committee's public keys
#[derive(Clone, Debug)]
pub struct CommitteeVerifier {
    members: Vec<VerifyingKey>,
    threshold: u16,
}

impl CommitteeVerifier {
    pub fn new(members: Vec<VerifyingKey>, threshold: u16) -> OracleResult<Self> {
        if threshold == 0 || threshold as usize > members.len() {
            return Err(OracleError::InvalidCommittee(format!(
                "threshold {} with {} members",
                threshold,
                members.len()
            )));
        }
        Ok(Self { members, threshold })
    }

    fn valid_signers(&self, digest: &[u8; 32], proof: &OracleProof) -> usize {
        let mut signers = BTreeSet::new();
        for entry in &proof.signatures {
            let Some(key) = self.members.get(entry.member as usize) else {
                continue;
            };
            let Ok(signature) = Signature::from_slice(&entry.signature) else {
                continue;
            };
            if key.verify(digest, &signature).is_ok() {
                signers.insert(entry.member);
            }
        }
        signers.len()
    }
}

impl ProofVerifier for CommitteeVerifier {
    fn verify(&self, statement: &ProofStatement<'_>, proof: &[u8]) -> bool {
        let Ok(proof) = OracleProof::from_bytes(proof) else {
            debug!("Undecodable oracle proof");
            return false;
        };
        let valid = self.valid_signers(&statement.digest(), &proof);
        if valid < self.threshold as usize {
            debug!(valid, threshold = self.threshold, "Oracle proof below threshold");
            return false;
        }
        true
    }
}

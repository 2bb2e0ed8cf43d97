//! In-process decryption oracle
//!
//! Queues requests, decrypts them on demand through a [`Decryptor`] and signs
//! the result with the committee. Answers are returned to the caller, who
//! delivers them to the protocol as a callback.

use std::collections::BTreeMap;
use std::sync::Arc;

use cipherbatch_fhe::Decryptor;
use cipherbatch_protocol::{
    DecryptionOracle, DecryptionRequest, ProofStatement, ProtocolResult, RequestId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{OracleError, OracleResult};
use crate::proof::Committee;

/// Committee parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub committee_size: u16,
    pub threshold: u16,
    /// Maximum number of unanswered requests
    pub queue_capacity: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            committee_size: 3,
            threshold: 2,
            queue_capacity: 256,
        }
    }
}

impl OracleConfig {
    pub fn validate(&self) -> OracleResult<()> {
        if self.threshold == 0 || self.threshold > self.committee_size {
            return Err(OracleError::InvalidCommittee(format!(
                "threshold {} with {} members",
                self.threshold, self.committee_size
            )));
        }
        if self.queue_capacity == 0 {
            return Err(OracleError::InvalidCommittee(
                "queue_capacity must be at least one".into(),
            ));
        }
        Ok(())
    }
}

/// A signed answer, ready to be delivered as a callback
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResponse {
    pub request_id: RequestId,
    pub cleartexts: Vec<u64>,
    pub proof: Vec<u8>,
}

/// Decrypt every handle of `request` and sign the result
pub fn respond<D: Decryptor>(
    decryptor: &D,
    committee: &Committee,
    request_id: RequestId,
    request: &DecryptionRequest,
) -> OracleResult<OracleResponse> {
    let cleartexts = request
        .handles
        .iter()
        .map(|h| decryptor.decrypt(h))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| OracleError::DecryptionError(e.to_string()))?;

    let statement = ProofStatement {
        instance: &request.instance,
        request_id,
        batch_id: request.batch_id,
        commitment: &request.commitment,
        cleartexts: &cleartexts,
    };
    let proof = committee.sign(&statement).to_bytes()?;

    Ok(OracleResponse {
        request_id,
        cleartexts,
        proof,
    })
}

#[derive(Default)]
struct Queue {
    next_id: u64,
    pending: BTreeMap<RequestId, DecryptionRequest>,
}

/// Local oracle committee
pub struct LocalOracle<D> {
    decryptor: D,
    committee: Arc<Committee>,
    capacity: usize,
    queue: Mutex<Queue>,
}

impl<D: Decryptor> LocalOracle<D> {
    /// Oracle with a freshly generated committee
    pub fn new(decryptor: D, config: &OracleConfig) -> OracleResult<Self> {
        config.validate()?;
        let committee = Committee::generate(config.committee_size, config.threshold)?;
        Ok(Self::with_committee(decryptor, Arc::new(committee), config.queue_capacity))
    }

    pub fn with_committee(decryptor: D, committee: Arc<Committee>, capacity: usize) -> Self {
        Self {
            decryptor,
            committee,
            capacity,
            queue: Mutex::new(Queue::default()),
        }
    }

    pub fn committee(&self) -> &Arc<Committee> {
        &self.committee
    }

    /// Number of unanswered requests
    pub fn pending_count(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// Continue numbering after `last`, typically the highest id a restored
    /// protocol state already holds. Never moves the counter backwards.
    pub fn resume_after(&self, last: Option<RequestId>) {
        if let Some(RequestId(last)) = last {
            let mut queue = self.queue.lock();
            queue.next_id = queue.next_id.max(last);
        }
    }

    /// Answer a specific request. A request that fails to decrypt stays queued.
    pub fn fulfill(&self, request_id: RequestId) -> OracleResult<OracleResponse> {
        let request = self
            .queue
            .lock()
            .pending
            .remove(&request_id)
            .ok_or(OracleError::RequestNotFound(request_id))?;
        self.answer(request_id, request)
    }

    /// Answer the oldest request, if any
    pub fn fulfill_next(&self) -> Option<OracleResult<OracleResponse>> {
        let (request_id, request) = self.queue.lock().pending.pop_first()?;
        Some(self.answer(request_id, request))
    }

    fn answer(
        &self,
        request_id: RequestId,
        request: DecryptionRequest,
    ) -> OracleResult<OracleResponse> {
        match respond(&self.decryptor, &self.committee, request_id, &request) {
            Ok(response) => {
                info!(request = %request_id, values = response.cleartexts.len(), "Decryption fulfilled");
                Ok(response)
            }
            Err(e) => {
                warn!(request = %request_id, error = %e, "Decryption failed, request kept");
                self.queue.lock().pending.insert(request_id, request);
                Err(e)
            }
        }
    }
}

impl<D: Decryptor> DecryptionOracle for LocalOracle<D> {
    fn submit(&self, request: DecryptionRequest) -> ProtocolResult<RequestId> {
        let mut queue = self.queue.lock();
        if queue.pending.len() >= self.capacity {
            return Err(OracleError::QueueFull {
                capacity: self.capacity,
            }
            .into());
        }
        queue.next_id += 1;
        let request_id = RequestId(queue.next_id);
        debug!(request = %request_id, batch = %request.batch_id, handles = request.handles.len(), "Decryption queued");
        queue.pending.insert(request_id, request);
        Ok(request_id)
    }
}

impl<D> std::fmt::Debug for LocalOracle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalOracle")
            .field("committee", &self.committee)
            .field("pending", &self.queue.lock().pending.len())
            .finish()
    }
}

//! Async protocol host
//!
//! Serializes every mutation of one protocol instance through a single lock,
//! relays decryption requests to an oracle worker over a channel and applies
//! the answers as callbacks.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BatchService                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  callers ──▶ Mutex<Protocol> ──events──▶ broadcast channel   │
//! │                   │      ▲                                   │
//! │     RelayedRequest│      │OracleResponse                     │
//! │                   ▼      │                                   │
//! │              ┌──────────────────┐                            │
//! │              │  oracle worker   │  decrypt + committee sign  │
//! │              └──────────────────┘                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cipherbatch_fhe::{Decryptor, FheEngine};
use cipherbatch_oracle::{respond, Committee, OracleResponse};
use cipherbatch_protocol::{
    CallContext, Command, DecryptionOracle, DecryptionOutcome, DecryptionRequest, Identity,
    Marker, ProofVerifier, Protocol, ProtocolError, ProtocolEvent, ProtocolResult, ProtocolState,
    Receipt, RequestId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors during service operation
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Seconds after which an unanswered request is reported overdue
    pub request_timeout_secs: u64,
    /// Buffered events per subscriber
    pub event_capacity: usize,
    /// Buffered requests and responses between host and oracle worker
    pub relay_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: crate::config::DEFAULT_REQUEST_TIMEOUT_SECS,
            event_capacity: crate::config::DEFAULT_EVENT_CAPACITY,
            relay_capacity: crate::config::DEFAULT_RELAY_CAPACITY,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> ServiceResult<()> {
        if self.request_timeout_secs == 0 {
            return Err(ServiceError::Config("request_timeout_secs must be positive".into()));
        }
        if self.event_capacity == 0 || self.relay_capacity == 0 {
            return Err(ServiceError::Config("channel capacities must be positive".into()));
        }
        Ok(())
    }
}

/// A request on its way to the oracle worker
#[derive(Clone, Debug)]
pub struct RelayedRequest {
    pub request_id: RequestId,
    pub request: DecryptionRequest,
}

/// Oracle endpoint that hands requests to a channel
#[derive(Debug)]
pub struct ChannelOracle {
    next_id: AtomicU64,
    tx: mpsc::Sender<RelayedRequest>,
}

impl ChannelOracle {
    pub fn new(tx: mpsc::Sender<RelayedRequest>) -> Self {
        Self::starting_after(tx, None)
    }

    /// Endpoint whose first id follows `last`
    pub fn starting_after(tx: mpsc::Sender<RelayedRequest>, last: Option<RequestId>) -> Self {
        Self {
            next_id: AtomicU64::new(last.map_or(0, |id| id.0)),
            tx,
        }
    }
}

impl DecryptionOracle for ChannelOracle {
    fn submit(&self, request: DecryptionRequest) -> ProtocolResult<RequestId> {
        let request_id = RequestId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.tx
            .try_send(RelayedRequest {
                request_id,
                request,
            })
            .map_err(|e| ProtocolError::OracleUnavailable(e.to_string()))?;
        Ok(request_id)
    }
}

/// Result of delivering a callback
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackStatus {
    Completed(DecryptionOutcome),
    /// Redelivery of an answer that was already applied
    Duplicate,
}

struct Inner<E, V> {
    protocol: Protocol<E, ChannelOracle, V>,
    deadlines: BTreeMap<RequestId, u64>,
}

/// Single-writer host for one protocol instance
pub struct BatchService<E, V> {
    inner: Mutex<Inner<E, V>>,
    events: broadcast::Sender<ProtocolEvent>,
    config: ServiceConfig,
}

impl<E, V> BatchService<E, V>
where
    E: FheEngine,
    V: ProofVerifier,
{
    /// Host `state`; returns the service and the receiving end of the oracle relay
    ///
    /// Request ids continue after the highest id in `state`, and unanswered
    /// requests get a deadline counted from their request time.
    pub fn new(
        state: ProtocolState,
        engine: E,
        verifier: V,
        config: ServiceConfig,
    ) -> ServiceResult<(Self, mpsc::Receiver<RelayedRequest>)> {
        config.validate()?;
        let (relay_tx, relay_rx) = mpsc::channel(config.relay_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);
        let deadlines: BTreeMap<_, _> = state
            .pending_requests()
            .map(|c| {
                let deadline = c.requested_at.saturating_add(config.request_timeout_secs);
                (c.request_id, deadline)
            })
            .collect();
        if !deadlines.is_empty() {
            info!(pending = deadlines.len(), "Tracking restored decryption requests");
        }
        let oracle = ChannelOracle::starting_after(relay_tx, state.last_request_id());
        let protocol = Protocol::new(state, engine, oracle, verifier);

        let service = Self {
            inner: Mutex::new(Inner {
                protocol,
                deadlines,
            }),
            events,
            config,
        };
        Ok((service, relay_rx))
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.events.subscribe()
    }

    /// Callers hold the state lock, so events go out in commit order
    fn publish<T>(&self, receipt: Receipt<T>) -> T {
        for event in receipt.events {
            debug!(event = event.name(), "Publishing event");
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        receipt.output
    }

    /// Run an operation that needs no collaborator (administration, pruning)
    pub fn execute<T>(
        &self,
        op: impl FnOnce(&mut ProtocolState) -> ProtocolResult<Receipt<T>>,
    ) -> ServiceResult<T> {
        let mut inner = self.inner.lock();
        let receipt = op(inner.protocol.state_mut())?;
        Ok(self.publish(receipt))
    }

    /// Read-only access to the state
    pub fn query<T>(&self, f: impl FnOnce(&ProtocolState) -> T) -> T {
        f(self.inner.lock().protocol.state())
    }

    pub fn submit_marker(&self, ctx: &CallContext, marker: Marker) -> ServiceResult<u32> {
        let mut inner = self.inner.lock();
        let receipt = inner.protocol.submit_marker(ctx, marker)?;
        Ok(self.publish(receipt))
    }

    pub fn submit_command(&self, ctx: &CallContext, command: Command) -> ServiceResult<u32> {
        let mut inner = self.inner.lock();
        let receipt = inner.protocol.submit_command(ctx, command)?;
        Ok(self.publish(receipt))
    }

    /// Request decryption of the current batch and start its deadline
    pub fn request_decryption(&self, ctx: &CallContext) -> ServiceResult<RequestId> {
        let mut inner = self.inner.lock();
        let receipt = inner.protocol.request_decryption(ctx)?;
        let deadline = ctx.now.saturating_add(self.config.request_timeout_secs);
        inner.deadlines.insert(receipt.output, deadline);
        Ok(self.publish(receipt))
    }

    /// Apply an oracle answer. Redeliveries are reported, not failed.
    pub fn deliver_callback(
        &self,
        ctx: &CallContext,
        response: OracleResponse,
    ) -> ServiceResult<CallbackStatus> {
        let request_id = response.request_id;
        let mut inner = self.inner.lock();
        let result = inner.protocol.on_decryption_callback(
            ctx,
            request_id,
            response.cleartexts,
            &response.proof,
        );

        match result {
            Ok(receipt) => {
                inner.deadlines.remove(&request_id);
                Ok(CallbackStatus::Completed(self.publish(receipt)))
            }
            Err(e) if e.is_benign_duplicate() => {
                debug!(request = %request_id, "Duplicate oracle callback");
                Ok(CallbackStatus::Duplicate)
            }
            Err(e) => {
                if e.class().is_security_relevant() {
                    warn!(request = %request_id, error = %e, "Oracle callback rejected");
                }
                Err(e.into())
            }
        }
    }

    /// Requests past their deadline and still unanswered
    pub fn overdue(&self, now: u64) -> Vec<RequestId> {
        let mut inner = self.inner.lock();
        let Inner {
            protocol,
            deadlines,
        } = &mut *inner;
        // Contexts evicted by pruning no longer need tracking.
        deadlines.retain(|id, _| {
            protocol
                .state()
                .decryption_context(*id)
                .map_or(false, |c| !c.processed)
        });
        deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Serialize the hosted state
    pub fn snapshot(&self) -> ServiceResult<Vec<u8>> {
        Ok(self.inner.lock().protocol.state().to_bytes()?)
    }

    /// Apply callbacks from `responses` until the channel closes
    ///
    /// Returns the number of completed decryptions.
    pub async fn run_callbacks(
        &self,
        oracle: Identity,
        mut responses: mpsc::Receiver<OracleResponse>,
    ) -> usize {
        let mut completed = 0;
        while let Some(response) = responses.recv().await {
            let ctx = CallContext::new(oracle, unix_now());
            match self.deliver_callback(&ctx, response) {
                Ok(CallbackStatus::Completed(outcome)) => {
                    completed += 1;
                    info!(request = %outcome.request_id, batch = %outcome.batch_id, "Callback applied");
                }
                Ok(CallbackStatus::Duplicate) => {}
                Err(e) => warn!(error = %e, "Callback failed"),
            }
        }
        completed
    }
}

/// Answer relayed requests with `decryptor` and `committee`
///
/// Runs until the relay closes. Failed decryptions are logged and dropped;
/// the request then shows up in [`BatchService::overdue`].
pub fn spawn_oracle_worker<D>(
    decryptor: D,
    committee: Arc<Committee>,
    mut requests: mpsc::Receiver<RelayedRequest>,
    responses: mpsc::Sender<OracleResponse>,
) -> JoinHandle<()>
where
    D: Decryptor + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(relayed) = requests.recv().await {
            match respond(&decryptor, &committee, relayed.request_id, &relayed.request) {
                Ok(response) => {
                    if responses.send(response).await.is_err() {
                        debug!("Callback channel closed, oracle worker exiting");
                        break;
                    }
                }
                Err(e) => warn!(request = %relayed.request_id, error = %e, "Oracle worker failed"),
            }
        }
    })
}

/// Seconds since the Unix epoch
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherbatch_fhe::{Encryptor, LocalEngine};
    use cipherbatch_oracle::CommitteeVerifier;
    use cipherbatch_protocol::{BatchId, InstanceId, ProtocolConfig};

    fn owner() -> Identity {
        Identity::from_bytes([1u8; 32])
    }

    fn setup() -> (
        BatchService<LocalEngine, CommitteeVerifier>,
        mpsc::Receiver<RelayedRequest>,
        LocalEngine,
        Arc<Committee>,
    ) {
        let engine = LocalEngine::new();
        let committee = Arc::new(Committee::from_seed(&[3u8; 32], 3, 2).unwrap());
        let state = ProtocolState::new(
            InstanceId::derive(&owner(), 0),
            owner(),
            ProtocolConfig::default(),
            0,
        )
        .unwrap();
        let (service, relay) = BatchService::new(
            state,
            engine.clone(),
            committee.verifier(),
            ServiceConfig::default(),
        )
        .unwrap();
        (service, relay, engine, committee)
    }

    fn marker(engine: &LocalEngine) -> Marker {
        Marker {
            x: engine.encrypt(10).unwrap(),
            y: engine.encrypt(15).unwrap(),
            unit_type: engine.encrypt(2).unwrap(),
            count: engine.encrypt(5).unwrap(),
        }
    }

    #[test]
    fn test_events_published() {
        let (service, _relay, engine, _) = setup();
        let mut events = service.subscribe();
        let ctx = CallContext::new(owner(), 0);

        service.execute(|s| s.open_batch(&ctx)).unwrap();
        assert_eq!(service.submit_marker(&ctx, marker(&engine)).unwrap(), 0);

        assert_eq!(
            events.try_recv().unwrap(),
            ProtocolEvent::BatchOpened { batch_id: BatchId(1) }
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            ProtocolEvent::MarkerSubmitted { index: 0, .. }
        ));
    }

    #[test]
    fn test_request_relayed_and_overdue() {
        let (service, mut relay, engine, _) = setup();
        let ctx = CallContext::new(owner(), 100);
        service.execute(|s| s.open_batch(&ctx)).unwrap();
        service.submit_marker(&ctx, marker(&engine)).unwrap();

        let id = service.request_decryption(&ctx).unwrap();
        let relayed = relay.try_recv().unwrap();
        assert_eq!(relayed.request_id, id);
        assert_eq!(relayed.request.handles.len(), 4);

        assert!(service.overdue(399).is_empty());
        assert_eq!(service.overdue(400), vec![id]);
    }

    #[test]
    fn test_callback_and_duplicate() {
        let (service, mut relay, engine, committee) = setup();
        let ctx = CallContext::new(owner(), 0);
        service.execute(|s| s.open_batch(&ctx)).unwrap();
        service.submit_marker(&ctx, marker(&engine)).unwrap();
        service.request_decryption(&ctx).unwrap();

        let relayed = relay.try_recv().unwrap();
        let response = respond(&engine, &committee, relayed.request_id, &relayed.request).unwrap();

        let first = service.deliver_callback(&ctx, response.clone()).unwrap();
        match first {
            CallbackStatus::Completed(outcome) => assert_eq!(outcome.cleartexts, vec![10, 15, 2, 5]),
            CallbackStatus::Duplicate => panic!("first delivery reported as duplicate"),
        }
        assert_eq!(
            service.deliver_callback(&ctx, response).unwrap(),
            CallbackStatus::Duplicate
        );
        assert!(service.overdue(u64::MAX).is_empty());
    }

    #[test]
    fn test_closed_relay_is_oracle_unavailable() {
        let (service, relay, engine, _) = setup();
        drop(relay);
        let ctx = CallContext::new(owner(), 0);
        service.execute(|s| s.open_batch(&ctx)).unwrap();
        service.submit_marker(&ctx, marker(&engine)).unwrap();

        assert!(matches!(
            service.request_decryption(&ctx),
            Err(ServiceError::Protocol(ProtocolError::OracleUnavailable(_)))
        ));
        assert_eq!(service.query(|s| s.pending_requests().count()), 0);
    }

    #[test]
    fn test_restored_state_keeps_request_ids_unique() {
        let (service, mut relay, engine, _) = setup();
        let ctx = CallContext::new(owner(), 100);
        service.execute(|s| s.open_batch(&ctx)).unwrap();
        service.submit_marker(&ctx, marker(&engine)).unwrap();
        let first = service.request_decryption(&ctx).unwrap();
        relay.try_recv().unwrap();

        let state = ProtocolState::from_bytes(&service.snapshot().unwrap()).unwrap();
        let committee = Committee::from_seed(&[3u8; 32], 3, 2).unwrap();
        let (restored, mut relay) = BatchService::new(
            state,
            engine.clone(),
            committee.verifier(),
            ServiceConfig::default(),
        )
        .unwrap();

        let later = CallContext::new(owner(), 10_000);
        restored.execute(|s| s.close_batch(&later)).unwrap();
        restored.execute(|s| s.open_batch(&later)).unwrap();
        restored.submit_marker(&later, marker(&engine)).unwrap();

        let second = restored.request_decryption(&later).unwrap();
        assert!(second > first);
        assert_eq!(relay.try_recv().unwrap().request_id, second);
        assert_eq!(restored.query(|s| s.pending_requests().count()), 2);
    }

    #[test]
    fn test_restored_pending_request_can_go_overdue() {
        let (service, _relay, engine, _) = setup();
        let ctx = CallContext::new(owner(), 100);
        service.execute(|s| s.open_batch(&ctx)).unwrap();
        service.submit_marker(&ctx, marker(&engine)).unwrap();
        let id = service.request_decryption(&ctx).unwrap();

        let state = ProtocolState::from_bytes(&service.snapshot().unwrap()).unwrap();
        let committee = Committee::from_seed(&[3u8; 32], 3, 2).unwrap();
        let (restored, _relay) =
            BatchService::new(state, engine, committee.verifier(), ServiceConfig::default())
                .unwrap();

        assert!(restored.overdue(399).is_empty());
        assert_eq!(restored.overdue(400), vec![id]);
    }

    #[test]
    fn test_events_follow_commit_order() {
        let (service, _relay, engine, _) = setup();
        let admin = CallContext::new(owner(), 0);
        let providers: Vec<Identity> =
            (10u8..26).map(|b| Identity::from_bytes([b; 32])).collect();
        for p in &providers {
            service.execute(|s| s.add_provider(&admin, *p)).unwrap();
        }
        service.execute(|s| s.open_batch(&admin)).unwrap();
        let mut events = service.subscribe();

        std::thread::scope(|scope| {
            for p in &providers {
                let service = &service;
                let engine = &engine;
                scope.spawn(move || {
                    let ctx = CallContext::new(*p, 0);
                    service.submit_marker(&ctx, marker(engine)).unwrap();
                });
            }
        });

        let indices: Vec<u32> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| match event {
                ProtocolEvent::MarkerSubmitted { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, (0..providers.len() as u32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_worker_round_trip() {
        let (service, relay, engine, committee) = setup();
        let (response_tx, response_rx) = mpsc::channel(8);
        let worker = spawn_oracle_worker(engine.clone(), committee, relay, response_tx);

        let ctx = CallContext::new(owner(), 0);
        service.execute(|s| s.open_batch(&ctx)).unwrap();
        service.submit_marker(&ctx, marker(&engine)).unwrap();
        let id = service.request_decryption(&ctx).unwrap();

        let service = Arc::new(service);
        let host = Arc::clone(&service);
        let callbacks = tokio::spawn(async move {
            host.run_callbacks(Identity::from_bytes([9u8; 32]), response_rx).await
        });

        for _ in 0..100 {
            if service.query(|s| s.decryption_context(id).map_or(false, |c| c.processed)) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(service.query(|s| s.decryption_context(id).unwrap().processed));

        worker.abort();
        callbacks.abort();
    }
}

//! Simulate Command - Run one protocol round end to end

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cipherbatch::service::{spawn_oracle_worker, unix_now, BatchService, CallbackStatus};
use cipherbatch_fhe::{Encryptor, LocalEngine};
use cipherbatch_oracle::Committee;
use cipherbatch_protocol::{CallContext, Command, Identity, InstanceId, Marker, ProtocolState};
use clap::Args;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{default_data_dir, default_snapshot_path, CipherbatchConfig};

/// Run a simulated batch: submit, close, decrypt, verify
#[derive(Args)]
pub struct SimulateCommand {
    /// Markers to submit
    #[arg(long, default_value_t = 2)]
    markers: u32,

    /// Commands to submit
    #[arg(long, default_value_t = 1)]
    commands: u32,

    /// Hex seed for a reproducible oracle committee
    #[arg(long)]
    committee_seed: Option<String>,

    /// Where to write the final state snapshot
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

fn identity(label: &str) -> Identity {
    Identity::from_bytes(cipherbatch_hash::hash(label.as_bytes()))
}

impl SimulateCommand {
    pub async fn execute(
        self,
        config_path: Option<PathBuf>,
        data_dir: Option<PathBuf>,
    ) -> anyhow::Result<()> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let config = CipherbatchConfig::resolve(config_path.as_deref(), &data_dir)?;

        let owner = identity("cipherbatch/owner");
        let provider = identity("cipherbatch/provider");
        let oracle = identity("cipherbatch/oracle");

        let committee = match &self.committee_seed {
            Some(seed) => {
                let bytes: [u8; 32] = hex::decode(seed.trim_start_matches("0x"))
                    .context("committee seed is not hex")?
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("committee seed must be 32 bytes"))?;
                Committee::from_seed(&bytes, config.oracle.committee_size, config.oracle.threshold)?
            }
            None => Committee::generate(config.oracle.committee_size, config.oracle.threshold)?,
        };
        let committee = Arc::new(committee);

        let mut now = unix_now();
        let engine = LocalEngine::new();
        let state = ProtocolState::new(
            InstanceId::derive(&owner, 0),
            owner,
            config.protocol.clone(),
            now,
        )?;
        let (service, relay) =
            BatchService::new(state, engine.clone(), committee.verifier(), config.service.clone())?;
        let mut events = service.subscribe();

        let (response_tx, mut response_rx) = mpsc::channel(config.service.relay_capacity);
        let worker = spawn_oracle_worker(engine.clone(), Arc::clone(&committee), relay, response_tx);

        let as_owner = |now| CallContext::new(owner, now);
        let as_provider = |now| CallContext::new(provider, now);
        let cooldown = config.protocol.cooldown_secs;
        let coordinate_max = config.protocol.coordinate_max;
        let (type_min, type_max) = (config.protocol.command_type_min, config.protocol.command_type_max);

        service.execute(|s| s.add_provider(&as_owner(now), provider))?;
        let batch_id = service.execute(|s| s.open_batch(&as_owner(now)))?;
        info!(batch = %batch_id, "Simulating round");

        // Random plaintexts within the configured bounds.
        {
            let mut rng = rand::thread_rng();
            for _ in 0..self.markers {
                let marker = Marker {
                    x: engine.encrypt(rng.gen_range(0..=coordinate_max))?,
                    y: engine.encrypt(rng.gen_range(0..=coordinate_max))?,
                    unit_type: engine.encrypt(rng.gen_range(1..=4))?,
                    count: engine.encrypt(rng.gen_range(1..=20))?,
                };
                service.submit_marker(&as_provider(now), marker)?;
                now += cooldown;
            }
            for unit in 0..self.commands {
                let command = Command {
                    target_x: engine.encrypt(rng.gen_range(0..=coordinate_max))?,
                    target_y: engine.encrypt(rng.gen_range(0..=coordinate_max))?,
                    command_type: engine.encrypt(rng.gen_range(type_min..=type_max))?,
                    unit_id: engine.encrypt(unit as u64)?,
                };
                service.submit_command(&as_provider(now), command)?;
                now += cooldown;
            }
        }

        service.execute(|s| s.close_batch(&as_owner(now)))?;
        let request_id = service.request_decryption(&as_provider(now))?;

        let response = response_rx
            .recv()
            .await
            .context("oracle worker stopped before answering")?;
        now += 1;
        let outcome = match service.deliver_callback(&CallContext::new(oracle, now), response)? {
            CallbackStatus::Completed(outcome) => outcome,
            CallbackStatus::Duplicate => anyhow::bail!("request {} answered twice", request_id),
        };
        worker.abort();

        while let Ok(event) = events.try_recv() {
            if self.json {
                println!("{}", serde_json::to_string(&event)?);
            } else {
                println!("event: {}", event.name());
            }
        }

        let snapshot_path = self.out.unwrap_or_else(|| default_snapshot_path(&data_dir));
        if let Some(parent) = snapshot_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&snapshot_path, service.snapshot()?)?;

        println!();
        println!("✅ Round complete");
        println!();
        println!("Batch:        {}", outcome.batch_id);
        println!("Request:      {}", outcome.request_id);
        println!("Committee:    {} of {}", committee.threshold(), committee.size());
        println!("Cleartexts:   {:?}", outcome.cleartexts);
        println!("Snapshot:     {}", snapshot_path.display());

        Ok(())
    }
}

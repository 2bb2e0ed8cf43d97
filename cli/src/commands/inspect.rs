//! Inspect Command - Summarize a state snapshot

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use cipherbatch_protocol::ProtocolState;
use clap::Args;

use crate::config::{default_data_dir, default_snapshot_path};

/// Show what a persisted snapshot contains
#[derive(Args)]
pub struct InspectCommand {
    /// Snapshot file (defaults to the data directory's snapshot)
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

impl InspectCommand {
    pub async fn execute(self, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
        let path = self.snapshot.unwrap_or_else(|| {
            default_snapshot_path(&data_dir.unwrap_or_else(default_data_dir))
        });
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let state = ProtocolState::from_bytes(&bytes)?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&summarize(&state)?)?);
            return Ok(());
        }

        println!("Instance:     {}", state.instance().to_hex());
        println!("Owner:        {}", state.owner().to_hex());
        println!("Providers:    {}", state.providers().count());
        println!("Paused:       {}", state.is_paused());
        println!("Cooldown:     {}s", state.cooldown_secs());
        println!(
            "Batch:        {} ({})",
            state.current_batch_id(),
            if state.is_batch_open() { "open" } else { "closed" }
        );
        println!();
        for id in state.batch_ids() {
            let batch = state.batch(id)?;
            println!(
                "  {:<6} markers {:<4} commands {:<4} commitment {}",
                id.to_string(),
                batch.markers().len(),
                batch.commands().len(),
                state.batch_commitment(id)?
            );
        }
        println!();
        println!(
            "Contexts:     {} pending, {} total",
            state.pending_requests().count(),
            state.decryption_contexts().count()
        );

        Ok(())
    }
}

fn summarize(state: &ProtocolState) -> anyhow::Result<serde_json::Value> {
    let mut batches = Vec::new();
    for id in state.batch_ids() {
        let batch = state.batch(id)?;
        batches.push(serde_json::json!({
            "id": id.0,
            "open": batch.open,
            "opened_at": batch.opened_at,
            "closed_at": batch.closed_at,
            "markers": batch.markers().len(),
            "commands": batch.commands().len(),
            "commitment": state.batch_commitment(id)?.to_hex(),
        }));
    }

    let contexts: Vec<_> = state
        .decryption_contexts()
        .map(|c| {
            serde_json::json!({
                "request_id": c.request_id.0,
                "batch_id": c.batch_id.0,
                "state_hash": c.state_hash.to_hex(),
                "processed": c.processed,
                "requested_at": c.requested_at,
                "processed_at": c.processed_at,
            })
        })
        .collect();

    Ok(serde_json::json!({
        "instance": state.instance().to_hex(),
        "owner": state.owner().to_hex(),
        "providers": state.providers().map(|p| p.to_hex()).collect::<Vec<_>>(),
        "paused": state.is_paused(),
        "config": serde_json::to_value(state.config())?,
        "current_batch": state.current_batch_id().0,
        "batches": batches,
        "contexts": contexts,
    }))
}

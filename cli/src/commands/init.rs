//! Init Command - Write a configuration file

use std::fs;
use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::config::{default_config_path, default_data_dir, CipherbatchConfig};

/// Initialize a data directory
#[derive(Args)]
pub struct InitCommand {
    /// Configuration preset (local, strict)
    #[arg(short, long, default_value = "local")]
    preset: String,

    /// Force overwrite existing configuration
    #[arg(short, long)]
    force: bool,
}

impl InitCommand {
    pub async fn execute(self, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let config_path = default_config_path(&data_dir);

        info!("Initializing cipherbatch with {} preset", self.preset);
        info!("Data directory: {}", data_dir.display());

        if config_path.exists() && !self.force {
            anyhow::bail!(
                "Already initialized at {}. Use --force to overwrite.",
                data_dir.display()
            );
        }

        let config = CipherbatchConfig::for_preset(&self.preset)?;
        fs::create_dir_all(data_dir.join("state"))?;
        config.save(&config_path)?;

        info!("Configuration saved to {}", config_path.display());

        println!();
        println!("✅ cipherbatch initialized");
        println!();
        println!("Configuration: {}", config_path.display());
        println!("Data directory: {}", data_dir.display());
        println!(
            "Cooldown: {}s, committee {} of {}",
            config.protocol.cooldown_secs, config.oracle.threshold, config.oracle.committee_size
        );
        println!();
        println!("To run a simulated round:");
        println!("  cipherbatch simulate --data-dir {}", data_dir.display());

        Ok(())
    }
}

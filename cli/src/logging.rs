//! Logging configuration

use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{default_data_dir, CipherbatchConfig, LoggingSettings};

/// Command-line flags override the config file's `[logging]` section.
///
/// A config that fails to load falls back to defaults here; the command
/// itself reports the error.
pub fn settings(
    config_path: Option<&Path>,
    data_dir: Option<&Path>,
    level: Option<&str>,
    json: bool,
) -> LoggingSettings {
    let data_dir = data_dir.map(Path::to_path_buf).unwrap_or_else(default_data_dir);
    let mut settings = CipherbatchConfig::resolve(config_path, &data_dir)
        .map(|c| c.logging)
        .unwrap_or_default();

    if let Some(level) = level {
        settings.level = level.to_string();
    }
    if json {
        settings.format = "json".to_string();
    }
    settings
}

/// Initialize logging; `RUST_LOG` wins over the configured level
pub fn init(settings: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match settings.format.as_str() {
        "json" => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?,
        "text" => subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to init logging: {}", e))?,
        other => anyhow::bail!("Unknown log format: {}", other),
    }

    Ok(())
}

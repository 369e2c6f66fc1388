//! Headless avatar host speaking newline-delimited JSON over stdin/stdout.
//!
//! Agent events and UI commands arrive on stdin; runtime events and
//! outbound dispatches leave on stdout as versioned envelopes.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use anyhow::Context;
use std::path::PathBuf;
use visage::AvatarConfig;
use visage::host::stdio::run_stdio_bridge;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise tracing to stderr only (stdout is reserved for the JSON
    // protocol).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("visage-host starting");

    let path = std::env::var_os("VISAGE_CONFIG")
        .map(PathBuf::from)
        .or_else(AvatarConfig::default_config_path);
    let config = match path {
        Some(path) if path.exists() => AvatarConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        Some(path) => {
            tracing::info!(path = %path.display(), "no config file; using defaults");
            AvatarConfig::default()
        }
        None => {
            tracing::info!("no config directory; using defaults");
            AvatarConfig::default()
        }
    };

    run_stdio_bridge(config).await.map_err(|e| {
        tracing::error!(error = %e, "visage-host exited with error");
        anyhow::anyhow!("visage-host failed: {e}")
    })?;

    tracing::info!("visage-host shut down cleanly");
    Ok(())
}

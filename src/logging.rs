use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info,relaybot=debug";
const PLATFORM_LOG_FILTER: &str = "serenity=debug,relaybot=debug";

/// Install the global subscriber: stdout always, plus a debug-level file
/// (truncated at startup) when `platform_log` is given.
///
/// `RUST_LOG` overrides the stdout filter.
pub fn init(platform_log: Option<&Path>) -> Result<()> {
    let stdout = fmt::layer().with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    );

    let file = match platform_log {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(EnvFilter::new(PLATFORM_LOG_FILTER)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set global subscriber: {}", e))?;

    Ok(())
}

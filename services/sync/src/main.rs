use anyhow::{Context, Result};
use signage_sync::{Config, SyncPipeline};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.service.log_level, &config.service.log_format)?;

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting signage sync"
    );

    let missing = config.missing_credentials();
    if !missing.is_empty() {
        warn!(
            missing = %missing.join(", "),
            "Credentials not set; the steps that need them will fail"
        );
    }

    let pipeline =
        SyncPipeline::from_config(&config).context("Failed to initialize service clients")?;

    match pipeline.run().await {
        Ok(report) => {
            if !report.is_clean() {
                warn!(
                    failures = report.failures.len(),
                    "Sync finished with skipped publishes or tags"
                );
            }
            info!(report = ?report, "Signage sync finished");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Signage sync aborted");
            Err(e).context("Signage sync aborted")
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(level: &str, format: &str) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("signage_sync={},warn", level)))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    if format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

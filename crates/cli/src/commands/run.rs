//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use super::load_blueprint;
use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig, StopReason};

/// Pause before each reconnect attempt
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    let mut blueprint = load_blueprint(&args.config)?;

    // Apply CLI overrides
    if let Some(ref address) = args.address {
        info!(address = %address, "Overriding device address from CLI");
        blueprint.device.address = Some(address.clone());
    }
    if let Some(ref name) = args.name {
        info!(name = %name, "Overriding device name from CLI");
        blueprint.device.name = Some(name.clone());
    }
    if args.address.is_some() || args.name.is_some() {
        config_loader::ConfigLoader::validate(&blueprint)
            .context("Configuration invalid after CLI overrides")?;
    }

    info!(
        device = %blueprint.device.label(),
        mode = %blueprint.input.mode,
        rate_hz = blueprint.input.rate_hz,
        characteristics = blueprint.input.characteristics.len(),
        buffers = blueprint.buffers.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let device = blueprint.device.label();
    let pipeline_config = PipelineConfig {
        blueprint,
        duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
        max_samples: (args.max_samples > 0).then_some(args.max_samples),
        report_interval: Duration::from_secs(args.report_interval.max(1)),
        reconnect_attempts: args.reconnect_attempts,
        reconnect_backoff: RECONNECT_BACKOFF,
        mock: args.mock,
        mock_interval: Duration::from_millis(args.mock_interval_ms.max(1)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    };

    let pipeline = Pipeline::new(pipeline_config);

    info!("Starting acquisition...");
    let stats = pipeline
        .run(shutdown_signal())
        .await
        .context("Acquisition failed")?;

    info!(
        rows = stats.ingestion.rows_appended,
        duration_secs = stats.duration.as_secs_f64(),
        rows_per_sec = format!("{:.2}", stats.rows_per_sec()),
        reason = %stats.stop_reason,
        "Acquisition finished"
    );
    stats.print_summary();

    if stats.stop_reason == StopReason::LinkLost {
        return Err(CliError::reconnect_exhausted(device, args.reconnect_attempts).into());
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
///
/// A handler that cannot be installed only disables that signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    warn!("Received shutdown signal, stopping acquisition...");
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &contracts::AcquisitionBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Device: {}", blueprint.device.label());
    if let Some(filter) = blueprint.device.uuid_filter {
        println!("  Service filter: {}", filter);
    }
    println!("\nInput:");
    println!("  Mode: {}", blueprint.input.mode);
    if blueprint.input.mode == contracts::ModeKind::Poll {
        if blueprint.input.rate_hz > 0.0 {
            println!("  Rate: {} Hz", blueprint.input.rate_hz);
        } else {
            println!("  Rate: as fast as the link allows");
        }
    } else {
        println!("  Subscribe on start: {}", blueprint.input.subscribe_on_start);
    }

    println!(
        "\nCharacteristics ({}):",
        blueprint.input.characteristics.len()
    );
    for characteristic in &blueprint.input.characteristics {
        println!(
            "  - {} -> {} channels{}",
            characteristic.uuid,
            characteristic.channels.len(),
            characteristic
                .time_channel
                .map(|t| format!(", time -> {}", t))
                .unwrap_or_default()
        );
    }

    println!("\nBuffers ({}):", blueprint.buffers.len());
    for (index, buffer) in blueprint.buffers.iter().enumerate() {
        println!("  [{}] {}", index, buffer.name);
    }

    println!();
}

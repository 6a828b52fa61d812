//! `validate` command implementation.

use std::collections::HashSet;

use anyhow::{Context, Result};
use contracts::{AcquisitionBlueprint, ModeKind};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    device: String,
    mode: String,
    characteristic_count: usize,
    channel_count: usize,
    buffer_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            let channel_count: usize = blueprint
                .input
                .characteristics
                .iter()
                .map(|c| c.channels.len())
                .sum();

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    device: blueprint.device.label(),
                    mode: blueprint.input.mode.to_string(),
                    characteristic_count: blueprint.input.characteristics.len(),
                    channel_count,
                    buffer_count: blueprint.buffers.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &AcquisitionBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();
    let input = &blueprint.input;

    // Buffers nothing writes to
    let bound: HashSet<_> = blueprint.bound_channels().collect();
    for (index, buffer) in blueprint.buffers.iter().enumerate() {
        if !bound.contains(&index) {
            warnings.push(format!(
                "Buffer '{}' (channel {}) is not bound to any characteristic",
                buffer.name, index
            ));
        }
    }

    // Samples without timestamps
    for c in &input.characteristics {
        if c.time_channel.is_none() {
            warnings.push(format!(
                "Characteristic {} has no time channel - samples carry no timestamp",
                c.uuid
            ));
        }
    }

    match input.mode {
        ModeKind::Poll if input.rate_hz == 0.0 => {
            warnings.push("input.rate_hz is 0 - polling as fast as the link allows".to_string());
        }
        ModeKind::Poll if input.subscribe_on_start => {
            warnings.push("input.subscribe_on_start has no effect in poll mode".to_string());
        }
        _ => {}
    }

    if blueprint.device.address.is_none() && blueprint.device.uuid_filter.is_none() {
        warnings.push(
            "Device matched by name only - set address or uuid_filter to avoid ambiguity"
                .to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Device: {}", summary.device);
            println!("  Mode: {}", summary.mode);
            println!("  Characteristics: {}", summary.characteristic_count);
            println!("  Channels: {}", summary.channel_count);
            println!("  Buffers: {}", summary.buffer_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

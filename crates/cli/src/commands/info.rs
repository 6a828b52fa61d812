//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::AcquisitionBlueprint;
use serde::Serialize;
use tracing::info;

use super::load_blueprint;
use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    device: DeviceInfo,
    input: InputInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    buffers: Vec<BufferInfo>,
}

#[derive(Serialize)]
struct DeviceInfo {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid_filter: Option<String>,
    connect_timeout_ms: u64,
    scan_timeout_ms: u64,
}

#[derive(Serialize)]
struct InputInfo {
    mode: String,
    rate_hz: f64,
    subscribe_on_start: bool,
    queue_capacity: usize,
    characteristics: Vec<CharacteristicInfo>,
}

#[derive(Serialize)]
struct CharacteristicInfo {
    uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_channel: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    channels: Vec<ChannelInfo>,
}

#[derive(Serialize)]
struct ChannelInfo {
    channel: usize,
    buffer: String,
    conversion: String,
}

#[derive(Serialize)]
struct BufferInfo {
    index: usize,
    name: String,
    capacity: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    let blueprint = load_blueprint(&args.config)?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

/// Name of the buffer behind a channel index
fn buffer_name(blueprint: &AcquisitionBlueprint, channel: usize) -> String {
    blueprint
        .buffers
        .get(channel)
        .map(|b| b.name.clone())
        .unwrap_or_else(|| format!("#{channel}"))
}

fn build_config_info(blueprint: &AcquisitionBlueprint, args: &InfoArgs) -> ConfigInfo {
    let device = &blueprint.device;
    let input = &blueprint.input;

    let characteristics = input
        .characteristics
        .iter()
        .map(|c| CharacteristicInfo {
            uuid: c.uuid.to_string(),
            time_channel: c.time_channel.map(|t| buffer_name(blueprint, t)),
            channels: if args.channels {
                c.channels
                    .iter()
                    .map(|b| ChannelInfo {
                        channel: b.channel,
                        buffer: buffer_name(blueprint, b.channel),
                        conversion: b.conversion.name().to_string(),
                    })
                    .collect()
            } else {
                Vec::new()
            },
        })
        .collect();

    let buffers = if args.buffers {
        blueprint
            .buffers
            .iter()
            .enumerate()
            .map(|(index, b)| BufferInfo {
                index,
                name: b.name.clone(),
                capacity: b.capacity,
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        device: DeviceInfo {
            id: device.id.clone(),
            name: device.name.clone(),
            address: device.address.clone(),
            uuid_filter: device.uuid_filter.map(|u| u.to_string()),
            connect_timeout_ms: device.connect_timeout_ms,
            scan_timeout_ms: device.scan_timeout_ms,
        },
        input: InputInfo {
            mode: input.mode.to_string(),
            rate_hz: input.rate_hz,
            subscribe_on_start: input.subscribe_on_start,
            queue_capacity: input.queue_capacity,
            characteristics,
        },
        buffers,
    }
}

fn print_config_info(blueprint: &AcquisitionBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               BLE Acquire Configuration                      ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let device = &blueprint.device;
    println!("📡 Device");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Id: {}", device.id);
    println!("   ├─ Name: {}", device.name.as_deref().unwrap_or("(any)"));
    println!("   ├─ Address: {}", device.address.as_deref().unwrap_or("(any)"));
    match device.uuid_filter {
        Some(filter) => println!("   ├─ Service filter: {}", filter),
        None => println!("   ├─ Service filter: (none)"),
    }
    println!(
        "   └─ Timeouts: connect {}ms, scan {}ms",
        device.connect_timeout_ms, device.scan_timeout_ms
    );

    let input = &blueprint.input;
    println!("\n⚙️  Input");
    println!("   ├─ Mode: {}", input.mode);
    println!("   ├─ Rate: {} Hz", input.rate_hz);
    println!("   ├─ Subscribe on start: {}", input.subscribe_on_start);
    println!("   └─ Queue capacity: {}", input.queue_capacity);

    println!("\n🔗 Characteristics ({})", input.characteristics.len());
    for (i, characteristic) in input.characteristics.iter().enumerate() {
        let is_last = i == input.characteristics.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        let time = characteristic
            .time_channel
            .map(|t| buffer_name(blueprint, t))
            .unwrap_or_else(|| "-".to_string());
        println!("   {} {} (time: {})", prefix, characteristic.uuid, time);

        if args.channels && !characteristic.channels.is_empty() {
            for (j, binding) in characteristic.channels.iter().enumerate() {
                let binding_is_last = j == characteristic.channels.len() - 1;
                let binding_prefix = if binding_is_last { "└─" } else { "├─" };
                println!(
                    "   {}  {} {} <- {:?}",
                    child_prefix,
                    binding_prefix,
                    buffer_name(blueprint, binding.channel),
                    binding.conversion
                );
            }
        } else {
            println!(
                "   {}  └─ {} channels",
                child_prefix,
                characteristic.channels.len()
            );
        }
    }

    if args.buffers && !blueprint.buffers.is_empty() {
        println!("\n📦 Buffers ({})", blueprint.buffers.len());
        for (i, buffer) in blueprint.buffers.iter().enumerate() {
            let is_last = i == blueprint.buffers.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            let capacity = if buffer.capacity == 0 {
                "unbounded".to_string()
            } else {
                buffer.capacity.to_string()
            };
            println!("   {} [{}] {} ({})", prefix, i, buffer.name, capacity);
        }
    }

    println!();
}

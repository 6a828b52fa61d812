//! 配置校验模块
//!
//! 校验规则：
//! - 设备至少给出 name 或 address，address 格式合法
//! - 轮询频率有限且 >= 0
//! - 至少一个特征值，UUID 唯一，每个特征值至少有一个输出
//! - 通道索引在缓冲区范围内，且每个通道只被一个绑定写入
//! - 命令队列容量 > 0
//! - 缓冲区名称非空且唯一

use std::collections::HashSet;

use contracts::{AcquisitionBlueprint, AcquisitionMode, ChannelIndex, ContractError};

/// 校验 AcquisitionBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &AcquisitionBlueprint) -> Result<(), ContractError> {
    validate_device(blueprint)?;
    validate_mode(blueprint)?;
    validate_characteristics(blueprint)?;
    validate_channels(blueprint)?;
    validate_queue(blueprint)?;
    validate_buffers(blueprint)?;
    Ok(())
}

/// 校验设备标识
fn validate_device(blueprint: &AcquisitionBlueprint) -> Result<(), ContractError> {
    let device = &blueprint.device;
    let has_name = device.name.as_deref().is_some_and(|n| !n.is_empty());
    let has_address = device.address.as_deref().is_some_and(|a| !a.is_empty());

    if !has_name && !has_address {
        return Err(ContractError::config_validation(
            "device",
            "either name or address must be given",
        ));
    }

    if let Some(address) = device.address.as_deref().filter(|a| !a.is_empty()) {
        if !is_valid_address(address) {
            return Err(ContractError::config_validation(
                "device.address",
                format!("invalid address '{address}', expected XX:XX:XX:XX:XX:XX"),
            ));
        }
    }

    if device.connect_timeout_ms == 0 {
        return Err(ContractError::config_validation(
            "device.connect_timeout_ms",
            "connect timeout must be > 0",
        ));
    }
    Ok(())
}

/// MAC 地址格式：6 组两位十六进制，以冒号分隔
pub(crate) fn is_valid_address(address: &str) -> bool {
    let parts: Vec<&str> = address.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// 校验采集模式与频率
fn validate_mode(blueprint: &AcquisitionBlueprint) -> Result<(), ContractError> {
    AcquisitionMode::from_config(blueprint.input.mode, blueprint.input.rate_hz).map(|_| ())
}

/// 校验特征值绑定
fn validate_characteristics(blueprint: &AcquisitionBlueprint) -> Result<(), ContractError> {
    let characteristics = &blueprint.input.characteristics;
    if characteristics.is_empty() {
        return Err(ContractError::config_validation(
            "input.characteristics",
            "at least one characteristic must be configured",
        ));
    }

    let mut seen = HashSet::new();
    for (idx, c) in characteristics.iter().enumerate() {
        if !seen.insert(c.uuid) {
            return Err(ContractError::config_validation(
                format!("input.characteristics[{idx}].uuid"),
                format!("duplicate characteristic {}", c.uuid),
            ));
        }
        if c.channels.is_empty() && c.time_channel.is_none() {
            return Err(ContractError::config_validation(
                format!("input.characteristics[{idx}]"),
                format!("characteristic {} has no output channel", c.uuid),
            ));
        }
    }
    Ok(())
}

/// 校验通道索引范围与唯一性
///
/// 时间通道可被多个特征值共享，数值通道不可。
fn validate_channels(blueprint: &AcquisitionBlueprint) -> Result<(), ContractError> {
    let buffer_count = blueprint.buffers.len();
    let check_range = |field: String, channel: ChannelIndex| {
        if channel >= buffer_count {
            Err(ContractError::config_validation(
                field,
                format!("channel {channel} out of range ({buffer_count} buffers)"),
            ))
        } else {
            Ok(())
        }
    };

    let mut value_channels = HashSet::new();
    let mut time_channels = HashSet::new();
    for (idx, c) in blueprint.input.characteristics.iter().enumerate() {
        for (b_idx, binding) in c.channels.iter().enumerate() {
            let field = format!("input.characteristics[{idx}].channels[{b_idx}].channel");
            check_range(field.clone(), binding.channel)?;
            if !value_channels.insert(binding.channel) {
                return Err(ContractError::config_validation(
                    field,
                    format!("duplicate channel {}", binding.channel),
                ));
            }
        }
        if let Some(t) = c.time_channel {
            check_range(format!("input.characteristics[{idx}].time_channel"), t)?;
            time_channels.insert(t);
        }
    }

    if let Some(ch) = value_channels.intersection(&time_channels).next() {
        return Err(ContractError::config_validation(
            "input.characteristics",
            format!("duplicate channel {ch} used as both value and time channel"),
        ));
    }
    Ok(())
}

/// 校验命令队列
fn validate_queue(blueprint: &AcquisitionBlueprint) -> Result<(), ContractError> {
    if blueprint.input.queue_capacity == 0 {
        return Err(ContractError::config_validation(
            "input.queue_capacity",
            "queue_capacity must be > 0",
        ));
    }
    Ok(())
}

/// 校验缓冲区配置
fn validate_buffers(blueprint: &AcquisitionBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, buffer) in blueprint.buffers.iter().enumerate() {
        if buffer.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("buffers[{idx}].name"),
                "buffer name cannot be empty",
            ));
        }
        if !seen.insert(buffer.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("buffers[{idx}].name"),
                format!("duplicate buffer name '{}'", buffer.name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{
        BufferConfig, ChannelBindingConfig, CharacteristicConfig, ConfigVersion,
        ConversionFunction, DeviceConfig, InputConfig, ModeKind,
    };
    use uuid::Uuid;

    fn minimal_blueprint() -> AcquisitionBlueprint {
        AcquisitionBlueprint {
            version: ConfigVersion::V1,
            device: DeviceConfig {
                id: "tag".into(),
                name: Some("SensorTag".into()),
                address: None,
                uuid_filter: None,
                connect_timeout_ms: 10_000,
                scan_timeout_ms: 5_000,
            },
            input: InputConfig {
                mode: ModeKind::Poll,
                rate_hz: 10.0,
                subscribe_on_start: false,
                queue_capacity: 64,
                characteristics: vec![CharacteristicConfig {
                    uuid: Uuid::from_u128(0xaa81),
                    channels: vec![
                        ChannelBindingConfig {
                            channel: 0,
                            conversion: ConversionFunction::default(),
                        },
                        ChannelBindingConfig {
                            channel: 1,
                            conversion: ConversionFunction::default(),
                        },
                    ],
                    time_channel: Some(2),
                }],
            },
            buffers: ["x", "y", "t"]
                .iter()
                .map(|n| BufferConfig {
                    name: n.to_string(),
                    capacity: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_valid_config() {
        let bp = minimal_blueprint();
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_missing_device_identity() {
        let mut bp = minimal_blueprint();
        bp.device.name = None;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("name or address"), "got: {err}");
    }

    #[test]
    fn test_invalid_address() {
        let mut bp = minimal_blueprint();
        bp.device.address = Some("AA:BB:CC".into());
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("invalid address"), "got: {err}");
        assert!(is_valid_address("aa:bb:cc:dd:ee:0f"));
    }

    #[test]
    fn test_negative_poll_rate() {
        let mut bp = minimal_blueprint();
        bp.input.rate_hz = -1.0;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("rate_hz"), "got: {err}");
    }

    #[test]
    fn test_negative_rate_allowed_for_notification() {
        let mut bp = minimal_blueprint();
        bp.input.mode = ModeKind::Notification;
        bp.input.rate_hz = -1.0;
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_no_characteristics() {
        let mut bp = minimal_blueprint();
        bp.input.characteristics.clear();
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("at least one characteristic"), "got: {err}");
    }

    #[test]
    fn test_characteristic_without_output() {
        let mut bp = minimal_blueprint();
        bp.input.characteristics[0].channels.clear();
        bp.input.characteristics[0].time_channel = None;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("no output channel"), "got: {err}");
    }

    #[test]
    fn test_duplicate_characteristic() {
        let mut bp = minimal_blueprint();
        let mut dup = bp.input.characteristics[0].clone();
        dup.channels.clear();
        bp.input.characteristics.push(dup);
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("duplicate characteristic"), "got: {err}");
    }

    #[test]
    fn test_channel_out_of_range() {
        let mut bp = minimal_blueprint();
        bp.input.characteristics[0].channels[1].channel = 7;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("out of range"), "got: {err}");
    }

    #[test]
    fn test_duplicate_channel() {
        let mut bp = minimal_blueprint();
        bp.input.characteristics[0].channels[1].channel = 0;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("duplicate channel"), "got: {err}");
    }

    #[test]
    fn test_time_channel_shared_between_characteristics() {
        let mut bp = minimal_blueprint();
        bp.buffers.push(BufferConfig {
            name: "z".into(),
            capacity: 0,
        });
        bp.input.characteristics.push(CharacteristicConfig {
            uuid: Uuid::from_u128(0xaa82),
            channels: vec![ChannelBindingConfig {
                channel: 3,
                conversion: ConversionFunction::default(),
            }],
            time_channel: Some(2),
        });
        assert!(validate(&bp).is_ok());
    }

    #[test]
    fn test_time_channel_collides_with_value_channel() {
        let mut bp = minimal_blueprint();
        bp.input.characteristics[0].time_channel = Some(1);
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("both value and time"), "got: {err}");
    }

    #[test]
    fn test_zero_queue_capacity() {
        let mut bp = minimal_blueprint();
        bp.input.queue_capacity = 0;
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("queue_capacity"), "got: {err}");
    }

    #[test]
    fn test_empty_buffer_name() {
        let mut bp = minimal_blueprint();
        bp.buffers[0].name = String::new();
        let err = validate(&bp).unwrap_err().to_string();
        assert!(err.contains("cannot be empty"), "got: {err}");
    }
}

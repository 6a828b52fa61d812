//! AcquisitionBlueprint - Config Loader 输出
//!
//! 描述一次采集会话的完整配置：目标设备、采集模式、特征值绑定、数据缓冲区。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ConversionFunction;

/// 缓冲区通道索引 (指向 `AcquisitionBlueprint::buffers`)
pub type ChannelIndex = usize;

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的采集配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 目标 BLE 设备
    pub device: DeviceConfig,

    /// 采集输入配置
    pub input: InputConfig,

    /// 数据缓冲区 (按通道索引排列)
    pub buffers: Vec<BufferConfig>,
}

/// 设备标识与连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 日志中使用的设备标识
    #[serde(default = "default_device_id")]
    pub id: String,

    /// 广播名称 (可选，与 address 至少填一个)
    #[serde(default)]
    pub name: Option<String>,

    /// MAC 地址 `XX:XX:XX:XX:XX:XX` (可选)
    #[serde(default)]
    pub address: Option<String>,

    /// 扫描时要求设备广播的服务 UUID
    #[serde(default)]
    pub uuid_filter: Option<Uuid>,

    /// 建立连接的超时时间 (毫秒)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// 扫描设备的超时时间 (毫秒)
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
}

fn default_device_id() -> String {
    "ble-device".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_scan_timeout_ms() -> u64 {
    5_000
}

impl DeviceConfig {
    /// 用于日志和错误信息的设备描述
    pub fn label(&self) -> String {
        match (&self.name, &self.address) {
            (Some(name), Some(addr)) => format!("{} ({name} @ {addr})", self.id),
            (Some(name), None) => format!("{} ({name})", self.id),
            (None, Some(addr)) => format!("{} (@ {addr})", self.id),
            (None, None) => self.id.clone(),
        }
    }
}

/// 采集模式
///
/// 反序列化时不区分大小写 (`"Poll"`、`"NOTIFICATION"` 均可)。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    /// 定时读取
    #[default]
    Poll,
    /// 通知 (无确认)
    Notification,
    /// 指示 (有确认)
    Indication,
}

impl ModeKind {
    const NAMES: &'static [&'static str] = &["poll", "notification", "indication"];
}

impl std::str::FromStr for ModeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" => Ok(Self::Poll),
            "notification" => Ok(Self::Notification),
            "indication" => Ok(Self::Indication),
            _ => Err(s.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ModeKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|s: String| serde::de::Error::unknown_variant(&s, Self::NAMES))
    }
}

impl std::fmt::Display for ModeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Notification => write!(f, "notification"),
            Self::Indication => write!(f, "indication"),
        }
    }
}

/// 采集输入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// 采集模式
    #[serde(default)]
    pub mode: ModeKind,

    /// 轮询频率 (Hz)；0 表示链路允许的最快速度
    #[serde(default)]
    pub rate_hz: f64,

    /// true: 在 start() 时写入 CCCD；false: 在 connect() 时写入
    #[serde(default)]
    pub subscribe_on_start: bool,

    /// GATT 命令队列容量
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// 特征值绑定列表
    pub characteristics: Vec<CharacteristicConfig>,
}

fn default_queue_capacity() -> usize {
    64
}

/// 单个特征值的绑定配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacteristicConfig {
    /// 特征值 UUID
    pub uuid: Uuid,

    /// 数值通道 (可一对多)
    #[serde(default)]
    pub channels: Vec<ChannelBindingConfig>,

    /// 时间通道 (可选)
    #[serde(default)]
    pub time_channel: Option<ChannelIndex>,
}

/// 通道绑定：目标通道 + 转换函数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelBindingConfig {
    /// 目标通道索引
    pub channel: ChannelIndex,

    /// 字节到数值的转换函数
    #[serde(default)]
    pub conversion: ConversionFunction,
}

/// 数据缓冲区配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// 缓冲区名称
    pub name: String,

    /// 最大长度，0 表示不限 (满时丢弃最旧的值)
    #[serde(default)]
    pub capacity: usize,
}

impl AcquisitionBlueprint {
    /// 所有被写入的通道 (数值通道 + 时间通道)
    pub fn bound_channels(&self) -> impl Iterator<Item = ChannelIndex> + '_ {
        self.input.characteristics.iter().flat_map(|c| {
            c.channels
                .iter()
                .map(|b| b.channel)
                .chain(c.time_channel.iter().copied())
        })
    }
}

//! Ingestion 错误类型

use contracts::ContractError;
use thiserror::Error;

/// 单个通道的转换失败 (调用方记为 NaN)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// 载荷长度不足
    #[error("payload too short: need {needed} bytes, got {available}")]
    Truncated {
        /// 需要的字节数
        needed: usize,
        /// 实际字节数
        available: usize,
    },

    /// 文本无法解析为数字
    #[error("invalid text: {0}")]
    InvalidText(String),

    /// 格式化文本中找不到字段
    #[error("field not found: {0}")]
    FieldNotFound(String),
}

/// Ingestion Result 类型别名 (生命周期错误统一为 ContractError)
pub type Result<T> = std::result::Result<T, ContractError>;

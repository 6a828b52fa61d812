//! 字节到数值的转换
//!
//! 纯函数。转换失败由调用方记为 NaN，不会中断采集。

use contracts::{ByteOrder, ConversionFunction};

use crate::error::ConversionError;

/// 按转换函数解析载荷，失败返回 `NaN`
#[inline]
pub fn convert(function: &ConversionFunction, payload: &[u8]) -> f64 {
    try_convert(function, payload).unwrap_or(f64::NAN)
}

/// 按转换函数解析载荷
///
/// # Errors
/// - `Truncated`: 载荷长度不足 `offset + width`
/// - `InvalidText`: 文本不是合法 UTF-8 或不是数字
/// - `FieldNotFound`: 格式化文本中找不到目标字段
pub fn try_convert(function: &ConversionFunction, payload: &[u8]) -> Result<f64, ConversionError> {
    use ConversionFunction as F;

    match function {
        F::Int8 { offset } => Ok(f64::from(field::<1>(payload, *offset)?[0] as i8)),
        F::Uint8 { offset } => Ok(f64::from(field::<1>(payload, *offset)?[0])),
        F::Int16 { offset, byte_order } => {
            let b = field::<2>(payload, *offset)?;
            Ok(f64::from(match byte_order {
                ByteOrder::Little => i16::from_le_bytes(b),
                ByteOrder::Big => i16::from_be_bytes(b),
            }))
        }
        F::Uint16 { offset, byte_order } => {
            let b = field::<2>(payload, *offset)?;
            Ok(f64::from(match byte_order {
                ByteOrder::Little => u16::from_le_bytes(b),
                ByteOrder::Big => u16::from_be_bytes(b),
            }))
        }
        F::Int24 { offset, byte_order } => {
            let raw = u24(field::<3>(payload, *offset)?, *byte_order);
            // 符号扩展
            Ok(f64::from(((raw << 8) as i32) >> 8))
        }
        F::Uint24 { offset, byte_order } => {
            Ok(f64::from(u24(field::<3>(payload, *offset)?, *byte_order)))
        }
        F::Int32 { offset, byte_order } => {
            let b = field::<4>(payload, *offset)?;
            Ok(f64::from(match byte_order {
                ByteOrder::Little => i32::from_le_bytes(b),
                ByteOrder::Big => i32::from_be_bytes(b),
            }))
        }
        F::Uint32 { offset, byte_order } => {
            let b = field::<4>(payload, *offset)?;
            Ok(f64::from(match byte_order {
                ByteOrder::Little => u32::from_le_bytes(b),
                ByteOrder::Big => u32::from_be_bytes(b),
            }))
        }
        F::Float32 { offset, byte_order } => {
            let b = field::<4>(payload, *offset)?;
            Ok(f64::from(match byte_order {
                ByteOrder::Little => f32::from_le_bytes(b),
                ByteOrder::Big => f32::from_be_bytes(b),
            }))
        }
        F::Float64 { offset, byte_order } => {
            let b = field::<8>(payload, *offset)?;
            Ok(match byte_order {
                ByteOrder::Little => f64::from_le_bytes(b),
                ByteOrder::Big => f64::from_be_bytes(b),
            })
        }
        F::Text { offset, length } => {
            let end = match length {
                Some(len) => offset.saturating_add(*len),
                None => payload.len().max(*offset),
            };
            let bytes = payload.get(*offset..end).ok_or(ConversionError::Truncated {
                needed: end,
                available: payload.len(),
            })?;
            parse_number(text(bytes)?)
        }
        F::FormattedText {
            separator,
            label,
            index,
        } => {
            let text = text(payload)?;
            let mut fields = text.split(separator.as_str()).map(str::trim);
            let value = match label {
                Some(label) => fields
                    .find_map(|f| f.strip_prefix(label.as_str()))
                    .map(|rest| rest.trim_start().trim_start_matches(['=', ':']))
                    .ok_or_else(|| ConversionError::FieldNotFound(label.clone()))?,
                None => fields
                    .nth(*index)
                    .ok_or_else(|| ConversionError::FieldNotFound(format!("#{index}")))?,
            };
            parse_number(value)
        }
    }
}

fn field<const N: usize>(payload: &[u8], offset: usize) -> Result<[u8; N], ConversionError> {
    let end = offset.saturating_add(N);
    payload
        .get(offset..end)
        .and_then(|s| s.try_into().ok())
        .ok_or(ConversionError::Truncated {
            needed: end,
            available: payload.len(),
        })
}

fn u24(b: [u8; 3], order: ByteOrder) -> u32 {
    match order {
        ByteOrder::Little => u32::from_le_bytes([b[0], b[1], b[2], 0]),
        ByteOrder::Big => u32::from_be_bytes([0, b[0], b[1], b[2]]),
    }
}

fn text(bytes: &[u8]) -> Result<&str, ConversionError> {
    std::str::from_utf8(bytes)
        .map(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .map_err(|e| ConversionError::InvalidText(e.to_string()))
}

fn parse_number(s: &str) -> Result<f64, ConversionError> {
    let s = s.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    s.parse::<f64>()
        .map_err(|_| ConversionError::InvalidText(format!("not a number: {s:?}")))
}

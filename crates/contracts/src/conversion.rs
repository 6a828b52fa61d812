//! Conversion descriptors
//!
//! Describes how a raw characteristic payload is turned into one `f64`.
//! The functions themselves live in `ingestion::conversion`.

use serde::{Deserialize, Serialize};

/// Byte order of multi-byte integer and float fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

/// Byte-to-value conversion function bound to a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionFunction {
    Int8 {
        #[serde(default)]
        offset: usize,
    },
    Uint8 {
        #[serde(default)]
        offset: usize,
    },
    Int16 {
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        byte_order: ByteOrder,
    },
    Uint16 {
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        byte_order: ByteOrder,
    },
    Int24 {
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        byte_order: ByteOrder,
    },
    Uint24 {
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        byte_order: ByteOrder,
    },
    Int32 {
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        byte_order: ByteOrder,
    },
    Uint32 {
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        byte_order: ByteOrder,
    },
    Float32 {
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        byte_order: ByteOrder,
    },
    Float64 {
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        byte_order: ByteOrder,
    },
    /// UTF-8 decimal number in `offset..offset + length` (to the end when `length` is absent)
    Text {
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        length: Option<usize>,
    },
    /// Delimited text such as `"T=21.5;H=40"`
    ///
    /// Picks the field starting with `label`, or the field at `index` when no label is given.
    FormattedText {
        #[serde(default = "default_separator")]
        separator: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        index: usize,
    },
}

fn default_separator() -> String {
    ",".to_string()
}

impl Default for ConversionFunction {
    fn default() -> Self {
        Self::Float32 {
            offset: 0,
            byte_order: ByteOrder::Little,
        }
    }
}

impl ConversionFunction {
    /// Fixed payload width in bytes (None for text conversions)
    pub fn width(&self) -> Option<usize> {
        match self {
            Self::Int8 { .. } | Self::Uint8 { .. } => Some(1),
            Self::Int16 { .. } | Self::Uint16 { .. } => Some(2),
            Self::Int24 { .. } | Self::Uint24 { .. } => Some(3),
            Self::Int32 { .. } | Self::Uint32 { .. } | Self::Float32 { .. } => Some(4),
            Self::Float64 { .. } => Some(8),
            Self::Text { .. } | Self::FormattedText { .. } => None,
        }
    }

    /// Short name used in logs and metric labels
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int8 { .. } => "int8",
            Self::Uint8 { .. } => "uint8",
            Self::Int16 { .. } => "int16",
            Self::Uint16 { .. } => "uint16",
            Self::Int24 { .. } => "int24",
            Self::Uint24 { .. } => "uint24",
            Self::Int32 { .. } => "int32",
            Self::Uint32 { .. } => "uint32",
            Self::Float32 { .. } => "float32",
            Self::Float64 { .. } => "float64",
            Self::Text { .. } => "text",
            Self::FormattedText { .. } => "formatted_text",
        }
    }
}

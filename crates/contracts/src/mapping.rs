//! CharacteristicMap - Connection Manager output
//!
//! Characteristic -> channel bindings, resolved against the discovered GATT table.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    ChannelIndex, CharacteristicConfig, ContractError, ConversionFunction, GattCharacteristic,
};

/// One value channel fed by a characteristic
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBinding {
    pub channel: ChannelIndex,
    pub conversion: ConversionFunction,
}

/// A discovered characteristic and the channels it feeds
#[derive(Debug, Clone)]
pub struct CharacteristicBinding {
    pub characteristic: GattCharacteristic,
    pub channels: Vec<ChannelBinding>,
    pub time_channel: Option<ChannelIndex>,
}

impl CharacteristicBinding {
    pub fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }
}

/// Characteristic mapping table
///
/// Preserves configuration order; lookups by UUID are O(1).
#[derive(Debug, Clone, Default)]
pub struct CharacteristicMap {
    bindings: Vec<CharacteristicBinding>,
    index: HashMap<Uuid, usize>,
}

impl CharacteristicMap {
    /// Create empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve configured bindings against the characteristics found on the device
    ///
    /// # Errors
    /// `Connection` when a configured characteristic is absent.
    pub fn resolve(
        device: &str,
        configs: &[CharacteristicConfig],
        discovered: &[GattCharacteristic],
    ) -> Result<Self, ContractError> {
        let mut map = Self::new();
        for cfg in configs {
            let characteristic = discovered
                .iter()
                .find(|c| c.uuid == cfg.uuid)
                .cloned()
                .ok_or_else(|| {
                    ContractError::connection(
                        device,
                        format!("characteristic {} not found on device", cfg.uuid),
                    )
                })?;
            map.insert(CharacteristicBinding {
                characteristic,
                channels: cfg
                    .channels
                    .iter()
                    .map(|b| ChannelBinding {
                        channel: b.channel,
                        conversion: b.conversion.clone(),
                    })
                    .collect(),
                time_channel: cfg.time_channel,
            });
        }
        Ok(map)
    }

    /// Register a binding (replaces an existing one with the same UUID)
    pub fn insert(&mut self, binding: CharacteristicBinding) {
        let uuid = binding.uuid();
        match self.index.get(&uuid) {
            Some(&idx) => self.bindings[idx] = binding,
            None => {
                self.index.insert(uuid, self.bindings.len());
                self.bindings.push(binding);
            }
        }
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&CharacteristicBinding> {
        self.index.get(uuid).map(|&idx| &self.bindings[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &CharacteristicBinding> {
        self.bindings.iter()
    }

    pub fn uuids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.bindings.iter().map(|b| b.uuid())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// All value channels in mapping order
    pub fn value_channels(&self) -> Vec<ChannelIndex> {
        self.bindings
            .iter()
            .flat_map(|b| b.channels.iter().map(|c| c.channel))
            .collect()
    }

    /// All time channels in mapping order, deduplicated
    pub fn time_channels(&self) -> Vec<ChannelIndex> {
        let mut out = Vec::new();
        for ch in self.bindings.iter().filter_map(|b| b.time_channel) {
            if !out.contains(&ch) {
                out.push(ch);
            }
        }
        out
    }
}

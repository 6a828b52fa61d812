//! GATT value types shared by the link layer and the acquisition core

use bytes::Bytes;
use uuid::{uuid, Uuid};

/// Client Characteristic Configuration Descriptor (0x2902)
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// CCCD value enabling notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value enabling indications
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

/// CCCD value disabling notifications and indications
pub const DISABLE_VALUE: [u8; 2] = [0x00, 0x00];

/// Characteristic property flags relevant to acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// Characteristic as discovered on a connected peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub properties: CharProperties,
    /// Descriptor UUIDs
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    /// Whether the CCCD is present
    pub fn has_cccd(&self) -> bool {
        self.descriptors.contains(&CLIENT_CHARACTERISTIC_CONFIG)
    }
}

/// Peripheral seen during a scan (or known from an earlier session)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// `XX:XX:XX:XX:XX:XX`
    pub address: String,
    pub name: Option<String>,
    /// Advertised service UUIDs
    pub services: Vec<Uuid>,
}

impl DiscoveredDevice {
    pub fn advertises(&self, service: &Uuid) -> bool {
        self.services.contains(service)
    }
}

/// Value pushed by the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattNotification {
    pub uuid: Uuid,
    pub value: Bytes,
}

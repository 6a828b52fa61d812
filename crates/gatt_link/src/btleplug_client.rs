//! Platform GATT client (btleplug)
//!
//! Uses the first Bluetooth adapter. Subscribing via btleplug also writes the
//! CCCD on most platforms; the explicit descriptor write still goes through so
//! that the latch observes a confirmed enable.

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use contracts::{CharProperties, DiscoveredDevice, GattCharacteristic, GattNotification};
use futures::StreamExt;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::client::{GattClient, NotificationStream};
use crate::error::{GattError, Result};

/// btleplug-backed client
pub struct BtleplugClient {
    adapter: Adapter,
    peripheral: Option<Peripheral>,
    characteristics: HashMap<Uuid, Characteristic>,
}

impl BtleplugClient {
    /// Open the first available adapter
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GattError::Platform("no Bluetooth adapter found".into()))?;
        info!(adapter = ?adapter.adapter_info().await.ok(), "Bluetooth adapter ready");
        Ok(Self {
            adapter,
            peripheral: None,
            characteristics: HashMap::new(),
        })
    }

    fn peripheral(&self) -> Result<&Peripheral> {
        self.peripheral.as_ref().ok_or(GattError::NotConnected)
    }

    fn characteristic(&self, uuid: Uuid) -> Result<&Characteristic> {
        self.characteristics
            .get(&uuid)
            .ok_or(GattError::CharacteristicNotFound { uuid })
    }
}

fn to_gatt_characteristic(c: &Characteristic) -> GattCharacteristic {
    GattCharacteristic {
        uuid: c.uuid,
        service_uuid: c.service_uuid,
        properties: CharProperties {
            read: c.properties.contains(CharPropFlags::READ),
            write: c.properties.contains(CharPropFlags::WRITE),
            notify: c.properties.contains(CharPropFlags::NOTIFY),
            indicate: c.properties.contains(CharPropFlags::INDICATE),
        },
        descriptors: c.descriptors.iter().map(|d| d.uuid).collect(),
    }
}

impl GattClient for BtleplugClient {
    #[instrument(name = "btleplug_scan", skip(self), fields(filter = ?service_filter))]
    async fn scan(
        &mut self,
        service_filter: Option<Uuid>,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredDevice>> {
        let filter = ScanFilter {
            services: service_filter.into_iter().collect(),
        };
        self.adapter.start_scan(filter).await?;
        tokio::time::sleep(timeout).await;
        self.adapter.stop_scan().await?;

        let mut devices = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            if let Some(properties) = peripheral.properties().await? {
                devices.push(DiscoveredDevice {
                    address: peripheral.address().to_string(),
                    name: properties.local_name,
                    services: properties.services,
                });
            }
        }
        debug!(found = devices.len(), "scan complete");
        Ok(devices)
    }

    #[instrument(name = "btleplug_connect", skip(self, device), fields(address = %device.address))]
    async fn connect(&mut self, device: &DiscoveredDevice) -> Result<()> {
        let peripheral = self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(&device.address))
            .ok_or_else(|| GattError::DeviceNotFound {
                device: device.address.clone(),
            })?;

        peripheral
            .connect()
            .await
            .map_err(|e| GattError::ConnectFailed {
                device: device.address.clone(),
                message: e.to_string(),
            })?;
        self.peripheral = Some(peripheral);
        Ok(())
    }

    async fn discover_characteristics(&mut self) -> Result<Vec<GattCharacteristic>> {
        let peripheral = self.peripheral()?.clone();
        peripheral.discover_services().await?;
        self.characteristics = peripheral
            .characteristics()
            .into_iter()
            .map(|c| (c.uuid, c))
            .collect();
        Ok(self
            .characteristics
            .values()
            .map(to_gatt_characteristic)
            .collect())
    }

    async fn read(&mut self, characteristic: Uuid) -> Result<Bytes> {
        let c = self.characteristic(characteristic)?;
        let value = self.peripheral()?.read(c).await?;
        Ok(Bytes::from(value))
    }

    async fn write(&mut self, characteristic: Uuid, value: Bytes) -> Result<()> {
        let c = self.characteristic(characteristic)?;
        self.peripheral()?
            .write(c, &value, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> Result<()> {
        let c = self.characteristic(characteristic)?;
        let peripheral = self.peripheral()?;
        if enabled {
            peripheral.subscribe(c).await?;
        } else {
            peripheral.unsubscribe(c).await?;
        }
        Ok(())
    }

    async fn write_descriptor(
        &mut self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Bytes,
    ) -> Result<()> {
        let c = self.characteristic(characteristic)?;
        let d = c
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor)
            .ok_or(GattError::DescriptorNotFound {
                characteristic,
                descriptor,
            })?;
        self.peripheral()?.write_descriptor(d, &value).await?;
        Ok(())
    }

    async fn notifications(&mut self) -> Result<NotificationStream> {
        let stream = self.peripheral()?.notifications().await?;
        Ok(stream
            .map(|n| GattNotification {
                uuid: n.uuid,
                value: Bytes::from(n.value),
            })
            .boxed())
    }

    #[instrument(name = "btleplug_disconnect", skip(self))]
    async fn disconnect(&mut self) -> Result<()> {
        self.characteristics.clear();
        if let Some(peripheral) = self.peripheral.take() {
            if peripheral.is_connected().await? {
                peripheral.disconnect().await?;
            }
        }
        Ok(())
    }
}

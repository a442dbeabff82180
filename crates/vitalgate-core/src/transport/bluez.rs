//! BlueZ transport via `bluer`.

use std::pin::pin;
use std::time::Duration;

use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, Address, Device};
use futures::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Characteristics, Link, Scanner, Subscription, Transport, TransportError, TransportResult};
use crate::config::BluetoothConfig;
use crate::types::DeviceHandle;

/// A BlueZ adapter acting as scanner and transport.
#[derive(Clone)]
pub struct BluezCentral {
    adapter: Adapter,
    characteristics: Characteristics,
    connect_timeout: Duration,
}

impl BluezCentral {
    /// Open the configured adapter (or the default one) and power it on.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AdapterUnavailable`] if BlueZ is not reachable
    /// or the adapter does not exist.
    pub async fn open(config: &BluetoothConfig) -> TransportResult<Self> {
        let unavailable = |e: bluer::Error| TransportError::AdapterUnavailable(e.to_string());

        let session = bluer::Session::new().await.map_err(unavailable)?;
        let adapter = match &config.adapter {
            Some(name) => session.adapter(name).map_err(unavailable)?,
            None => session.default_adapter().await.map_err(unavailable)?,
        };
        adapter.set_powered(true).await.map_err(unavailable)?;
        info!(adapter = adapter.name(), "Bluetooth adapter ready");

        Ok(Self {
            adapter,
            characteristics: Characteristics::from(config),
            connect_timeout: config.connect_timeout(),
        })
    }

    async fn find_characteristic(device: &Device, uuid: Uuid) -> TransportResult<Characteristic> {
        let lookup = |e: bluer::Error| TransportError::ConnectFailed {
            address: device.address().to_string(),
            message: e.to_string(),
        };
        for service in device.services().await.map_err(lookup)? {
            for characteristic in service.characteristics().await.map_err(lookup)? {
                if characteristic.uuid().await.map_err(lookup)? == uuid {
                    return Ok(characteristic);
                }
            }
        }
        Err(TransportError::CharacteristicNotFound(uuid))
    }

    async fn open_link(
        &self,
        device: &Device,
        address: &str,
    ) -> TransportResult<Vec<(Uuid, Characteristic)>> {
        // BlueZ can block on Connect indefinitely when the device is out of range
        tokio::time::timeout(self.connect_timeout, device.connect())
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::ConnectFailed {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        let write = Self::find_characteristic(device, self.characteristics.write).await?;
        let notify = Self::find_characteristic(device, self.characteristics.notify).await?;
        Ok(vec![
            (self.characteristics.write, write),
            (self.characteristics.notify, notify),
        ])
    }
}

impl Scanner for BluezCentral {
    async fn scan(&self, window: Duration) -> TransportResult<Vec<DeviceHandle>> {
        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(|e| TransportError::ScanFailed(e.to_string()))?;
        let mut events = pin!(events);

        let deadline = tokio::time::Instant::now() + window;
        let mut seen: Vec<Address> = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.next()).await {
            if let AdapterEvent::DeviceAdded(address) = event {
                if !seen.contains(&address) {
                    seen.push(address);
                }
            }
        }
        // dropping the event stream stops discovery
        drop(events);

        let mut devices = Vec::with_capacity(seen.len());
        for address in seen {
            let Ok(device) = self.adapter.device(address) else {
                continue;
            };
            if let Ok(Some(name)) = device.name().await {
                debug!(%address, name, "Discovered device");
                devices.push(DeviceHandle::new(address.to_string(), name));
            }
        }
        Ok(devices)
    }
}

impl Transport for BluezCentral {
    type Link = BluezLink;

    async fn connect(&self, address: &str) -> TransportResult<BluezLink> {
        let parsed: Address = address
            .parse()
            .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;
        let device = self
            .adapter
            .device(parsed)
            .map_err(|e| TransportError::ConnectFailed {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        match self.open_link(&device, address).await {
            Ok(characteristics) => Ok(BluezLink {
                device,
                characteristics,
            }),
            Err(e) => {
                // also aborts a Connect still pending after a timeout
                if let Err(close) = device.disconnect().await {
                    debug!(address, error = %close, "Disconnect after failed connect");
                }
                Err(e)
            }
        }
    }
}

/// An open BlueZ connection with its resolved characteristics.
pub struct BluezLink {
    device: Device,
    characteristics: Vec<(Uuid, Characteristic)>,
}

impl BluezLink {
    fn characteristic(&self, uuid: Uuid) -> TransportResult<&Characteristic> {
        self.characteristics
            .iter()
            .find(|(id, _)| *id == uuid)
            .map(|(_, c)| c)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }
}

impl Link for BluezLink {
    async fn is_connected(&self) -> bool {
        self.device.is_connected().await.unwrap_or(false)
    }

    async fn write(&self, characteristic: Uuid, bytes: &[u8]) -> TransportResult<()> {
        self.characteristic(characteristic)?
            .write(bytes)
            .await
            .map_err(|e| TransportError::WriteFailed {
                characteristic,
                message: e.to_string(),
            })
    }

    async fn subscribe(&self, characteristic: Uuid) -> TransportResult<Subscription> {
        let stream = self
            .characteristic(characteristic)?
            .notify()
            .await
            .map_err(|e| TransportError::SubscribeFailed {
                characteristic,
                message: e.to_string(),
            })?;
        Ok(stream.boxed())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.device
            .disconnect()
            .await
            .map_err(|e| TransportError::ConnectFailed {
                address: self.device.address().to_string(),
                message: e.to_string(),
            })
    }
}

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use log::debug;

use crate::error::DeviceError;

/// The GATT operations a [`crate::device::session::DeviceSession`] needs from a peripheral.
///
/// Implementations do not apply deadlines, the session does.
#[async_trait]
pub trait GattLink: Send + Sync {
    async fn connect(&self) -> Result<(), DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;

    async fn is_connected(&self) -> Result<bool, DeviceError>;

    /// Discovers services and returns every characteristic of the peripheral.
    async fn discover(&self) -> Result<Vec<Characteristic>, DeviceError>;

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>, DeviceError>;

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<(), DeviceError>;
}

/// A [`GattLink`] backed by a btleplug peripheral.
#[derive(Debug, Clone)]
pub struct BtleLink {
    peripheral: Peripheral,
}

impl BtleLink {
    pub fn new(peripheral: Peripheral) -> Self {
        BtleLink { peripheral }
    }
}

#[async_trait]
impl GattLink for BtleLink {
    async fn connect(&self) -> Result<(), DeviceError> {
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, DeviceError> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn discover(&self) -> Result<Vec<Characteristic>, DeviceError> {
        self.peripheral.discover_services().await?;

        let mut characteristics = Vec::new();
        for service in self.peripheral.services() {
            debug!("Found service {:?} with {} characteristic(s)", service.uuid, service.characteristics.len());
            characteristics.extend(service.characteristics.into_iter());
        }

        Ok(characteristics)
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>, DeviceError> {
        Ok(self.peripheral.read(characteristic).await?)
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<(), DeviceError> {
        self.peripheral.write(characteristic, data, WriteType::WithResponse).await?;
        Ok(())
    }
}

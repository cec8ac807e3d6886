// Desktop radio backed by btleplug.
//
// The adapter is opened on first use so that `config` commands work on
// machines without Bluetooth.

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter as BtScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use taurine_ble_core::models::{Characteristic, Descriptor};
use taurine_ble_core::{BluetoothLeDevice, NativeBle, NativeError, ScanFilter, Service};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct DesktopRadio {
    adapter_index: usize,
    adapter: OnceCell<Adapter>,
}

impl DesktopRadio {
    pub fn new(adapter_index: usize) -> Self {
        Self {
            adapter_index,
            adapter: OnceCell::new(),
        }
    }

    async fn adapter(&self) -> Result<&Adapter, NativeError> {
        self.adapter
            .get_or_try_init(|| async {
                let manager = Manager::new().await.map_err(platform)?;
                let adapters = manager.adapters().await.map_err(platform)?;
                debug!("Found {} Bluetooth adapters", adapters.len());
                adapters
                    .into_iter()
                    .nth(self.adapter_index)
                    .ok_or(NativeError::NoAdapter)
            })
            .await
    }

    async fn find(&self, address: &str) -> Result<Peripheral, NativeError> {
        let peripherals = self.adapter().await?.peripherals().await.map_err(platform)?;
        peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
            .ok_or_else(|| NativeError::NoPeripheral(address.to_string()))
    }
}

fn platform(err: btleplug::Error) -> NativeError {
    NativeError::Platform(err.to_string())
}

fn scan_filter(filter: &ScanFilter) -> BtScanFilter {
    let services = filter
        .services
        .iter()
        .filter_map(|service| match Uuid::parse_str(service) {
            Ok(uuid) => Some(uuid),
            Err(e) => {
                warn!("Ignoring filter service {}: {}", service, e);
                None
            }
        })
        .collect();
    BtScanFilter { services }
}

fn convert_service(service: btleplug::api::Service) -> Service {
    Service {
        uuid: service.uuid.to_string(),
        primary: service.primary,
        characteristics: service
            .characteristics
            .into_iter()
            .map(|characteristic| Characteristic {
                uuid: characteristic.uuid.to_string(),
                service_uuid: characteristic.service_uuid.to_string(),
                properties: characteristic.properties.bits(),
                descriptors: characteristic
                    .descriptors
                    .into_iter()
                    .map(|descriptor| Descriptor {
                        uuid: descriptor.uuid.to_string(),
                        characteristic_uuid: descriptor.characteristic_uuid.to_string(),
                        service_uuid: descriptor.service_uuid.to_string(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

#[async_trait]
impl NativeBle for DesktopRadio {
    async fn start_scan(&self, filter: &ScanFilter) -> Result<(), NativeError> {
        self.adapter()
            .await?
            .start_scan(scan_filter(filter))
            .await
            .map_err(platform)
    }

    async fn stop_scan(&self) -> Result<(), NativeError> {
        self.adapter().await?.stop_scan().await.map_err(platform)
    }

    async fn peripherals(&self) -> Result<Vec<BluetoothLeDevice>, NativeError> {
        let peripherals = self.adapter().await?.peripherals().await.map_err(platform)?;

        let mut devices = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => continue,
                Err(e) => {
                    debug!("No properties for {}: {}", peripheral.address(), e);
                    continue;
                }
            };
            devices.push(BluetoothLeDevice {
                address: peripheral.address().to_string(),
                name: properties.local_name,
                uuids: properties.services.iter().map(Uuid::to_string).collect(),
            });
        }
        Ok(devices)
    }

    async fn connect(&self, address: &str) -> Result<(), NativeError> {
        let peripheral = self.find(address).await?;
        if !peripheral.is_connected().await.map_err(platform)? {
            peripheral.connect().await.map_err(platform)?;
        }
        peripheral.discover_services().await.map_err(platform)
    }

    async fn services(&self, address: &str) -> Result<Vec<Service>, NativeError> {
        let peripheral = self.find(address).await?;
        Ok(peripheral.services().into_iter().map(convert_service).collect())
    }
}

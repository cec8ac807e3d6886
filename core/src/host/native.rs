// Platform radio abstraction.
//
// The host never touches a Bluetooth stack directly. Desktop builds implement
// this over btleplug, mobile builds over the Kotlin/Swift plugin, tests over a
// mock.

use crate::models::{BluetoothLeDevice, ScanFilter, Service};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NativeError {
    #[error("No Bluetooth adapter found")]
    NoAdapter,
    #[error("Peripheral not found: {0}")]
    NoPeripheral(String),
    #[error("Operation timed out: {0}")]
    Timeout(String),
    #[error("Platform error: {0}")]
    Platform(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NativeBle: Send + Sync {
    /// Start the radio scan. Discovered peripherals show up in `peripherals()`.
    async fn start_scan(&self, filter: &ScanFilter) -> Result<(), NativeError>;

    async fn stop_scan(&self) -> Result<(), NativeError>;

    /// Every peripheral seen so far.
    async fn peripherals(&self) -> Result<Vec<BluetoothLeDevice>, NativeError>;

    /// Connect and discover services.
    async fn connect(&self, address: &str) -> Result<(), NativeError>;

    async fn services(&self, address: &str) -> Result<Vec<Service>, NativeError>;
}

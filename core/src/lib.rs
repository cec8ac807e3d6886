// Taurine BLE: webview Bluetooth LE bridge
//
// Two halves joined only by commands and events:
//   host:   permission gate and scan sessions that emit events
//   bridge: the webview-side client that turns those events into streams

pub mod bridge;
pub mod config;
pub mod host;
pub mod models;
pub mod permissions;
pub mod protocol;

pub use bridge::{BluetoothLeClient, BridgeError, Scan, ScanPhase, ScanStream};
pub use config::{BridgeConfig, ConfigError};
pub use host::{BleHost, HostError, NativeBle, NativeError};
pub use models::{
    AndroidInitRequest, BluetoothLeDevice, Characteristic, ConnectRequest, Descriptor,
    GetServicesRequest, InitRequest, ScanFilter, ScanRequest, Service,
};
pub use permissions::{
    PermissionAlias, PermissionError, PermissionPlatform, PermissionResolver, PermissionSet,
    PermissionState,
};
pub use protocol::{
    Command, CommandHandler, CommandInvoker, EventBus, EventEmitter, LocalEventBus,
    LoopbackInvoker, ProtocolError, SessionToken,
};

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; only the first subscriber wins.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

//! Host side of the plugin
//!
//! `BleHost` answers the four bridge commands. It owns the permission gate,
//! the scanning/connected bookkeeping and the scan worker that turns native
//! peripheral polls into discovered-device and scan-stopped events.

pub mod native;
mod scan_worker;

pub use native::{NativeBle, NativeError};

use crate::config::{BridgeConfig, ConfigError};
use crate::models::{
    ConnectRequest, GetServicesRequest, InitRequest, ScanPayload, ScanRequest, Service,
};
use crate::permissions::{PermissionError, PermissionResolver};
use crate::protocol::{
    codes, scoped_event, Command, CommandHandler, EventEmitter, ProtocolError, SessionToken,
    DEVICE_DISCOVERED_EVENT, SCAN_STOPPED_EVENT,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use scan_worker::ScanWorker;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("Bluetooth LE not initialized, call init first")]
    NotInitialized,
    #[error("Scan in progress")]
    ScanInProgress,
    #[error("Already connected")]
    AlreadyConnected,
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Native(#[from] NativeError),
}

impl HostError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => codes::NOT_INITIALIZED,
            Self::ScanInProgress => codes::SCAN_IN_PROGRESS,
            Self::AlreadyConnected => codes::ALREADY_CONNECTED,
            Self::Permission(_) => codes::PERMISSION_DENIED,
            Self::Native(_) => codes::NATIVE_ERROR,
        }
    }
}

impl From<HostError> for ProtocolError {
    fn from(err: HostError) -> Self {
        ProtocolError::rejected(err.code(), err.to_string())
    }
}

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct HostState {
    pub initialized: bool,
    pub scanning: bool,
    pub connected: Vec<String>,
}

/// Holds the scanning flag for a start_scan call. Clears it on drop unless
/// handed to the scan worker, so a failed or cancelled start never leaves
/// the host refusing scans.
struct ScanClaim {
    state: Arc<Mutex<HostState>>,
    armed: bool,
}

impl ScanClaim {
    fn acquire(state: &Arc<Mutex<HostState>>) -> Result<Self, HostError> {
        let mut guard = state.lock();
        if guard.scanning {
            return Err(HostError::ScanInProgress);
        }
        guard.scanning = true;
        Ok(Self {
            state: state.clone(),
            armed: true,
        })
    }

    fn release_to_worker(mut self) {
        self.armed = false;
    }
}

impl Drop for ScanClaim {
    fn drop(&mut self) {
        if self.armed {
            debug!("Scan start abandoned, clearing scanning flag");
            self.state.lock().scanning = false;
        }
    }
}

// ============================================================================
// HOST
// ============================================================================

pub struct BleHost {
    config: BridgeConfig,
    native: Arc<dyn NativeBle>,
    emitter: Arc<dyn EventEmitter>,
    permissions: Option<PermissionResolver>,
    state: Arc<Mutex<HostState>>,
}

impl BleHost {
    /// Host without a permission gate (desktop).
    pub fn new(
        config: BridgeConfig,
        native: Arc<dyn NativeBle>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            config,
            native,
            emitter,
            permissions: None,
            state: Arc::new(Mutex::new(HostState::default())),
        })
    }

    /// Runs `resolver` on every init (mobile).
    pub fn with_permissions(mut self, resolver: PermissionResolver) -> Self {
        self.permissions = Some(resolver);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    pub fn connected_devices(&self) -> Vec<String> {
        self.state.lock().connected.clone()
    }

    pub async fn init(&self, request: InitRequest) -> Result<(), HostError> {
        let result = match &self.permissions {
            Some(resolver) => {
                let android = request.android.unwrap_or_default();
                resolver.init(&android).await.map_err(HostError::from)
            }
            None => Ok(()),
        };

        self.state.lock().initialized = result.is_ok();
        if result.is_ok() {
            info!("Bluetooth LE initialized");
        }
        result
    }

    fn ensure_initialized(&self) -> Result<(), HostError> {
        if self.config.require_init && !self.state.lock().initialized {
            return Err(HostError::NotInitialized);
        }
        Ok(())
    }

    /// Starts the native scan and acks. Events follow from the scan worker.
    pub async fn start_scan(&self, request: ScanRequest) -> Result<(), HostError> {
        self.ensure_initialized()?;

        let claim = ScanClaim::acquire(&self.state)?;

        let ScanRequest {
            timeout,
            filter,
            session,
        } = request;
        let filter = filter.unwrap_or_default();

        if let Err(e) = self.native.start_scan(&filter).await {
            warn!("Native scan failed to start: {}", e);
            return Err(e.into());
        }

        let session = match session.as_deref().map(str::parse::<SessionToken>) {
            Some(Ok(token)) => Some(token),
            Some(Err(e)) => {
                warn!("Ignoring malformed scan session: {}", e);
                None
            }
            None => None,
        };

        let worker = ScanWorker {
            native: self.native.clone(),
            emitter: self.emitter.clone(),
            state: self.state.clone(),
            filter,
            timeout: self.config.scan_timeout(timeout),
            poll_interval: self.config.poll_interval(),
            discovered_event: scoped_event(DEVICE_DISCOVERED_EVENT, session.as_ref()),
            stopped_event: scoped_event(SCAN_STOPPED_EVENT, session.as_ref()),
        };
        // The worker owns the flag from here.
        claim.release_to_worker();
        tokio::spawn(worker.run());

        Ok(())
    }

    pub async fn connect(&self, request: ConnectRequest) -> Result<(), HostError> {
        self.ensure_initialized()?;

        if self.state.lock().connected.contains(&request.address) {
            return Err(HostError::AlreadyConnected);
        }

        let connect = self.native.connect(&request.address);
        match request.timeout {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), connect)
                .await
                .map_err(|_| {
                    NativeError::Timeout(format!("connect to {} after {}ms", request.address, ms))
                })??,
            None => connect.await?,
        }

        let mut state = self.state.lock();
        if !state.connected.contains(&request.address) {
            state.connected.push(request.address.clone());
        }
        info!("Connected to {}", request.address);
        Ok(())
    }

    pub async fn get_services(&self, request: GetServicesRequest) -> Result<Vec<Service>, HostError> {
        self.ensure_initialized()?;
        Ok(self.native.services(&request.address).await?)
    }
}

fn parse_payload<T: DeserializeOwned>(command: Command, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::MalformedPayload {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(command: Command, value: T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value)
        .map_err(|e| ProtocolError::Dispatch(format!("{} result: {}", command, e)))
}

#[async_trait]
impl CommandHandler for BleHost {
    async fn handle(&self, command: Command, payload: Value) -> Result<Value, ProtocolError> {
        match command {
            Command::Init => {
                let request: Option<InitRequest> = parse_payload(command, payload)?;
                self.init(request.unwrap_or_default()).await?;
                Ok(Value::Null)
            }
            Command::StartScan => {
                let request: Option<ScanPayload> = parse_payload(command, payload)?;
                self.start_scan(request.map(ScanRequest::from).unwrap_or_default())
                    .await?;
                Ok(Value::Null)
            }
            Command::Connect => {
                let request: ConnectRequest = parse_payload(command, payload)?;
                self.connect(request).await?;
                Ok(Value::Null)
            }
            Command::GetServices => {
                let request: GetServicesRequest = parse_payload(command, payload)?;
                let services = self.get_services(request).await?;
                encode(command, services)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BluetoothLeDevice;
    use crate::protocol::{EventBus, LocalEventBus};
    use futures::StreamExt;
    use native::MockNativeBle;
    use serde_json::json;

    fn device(address: &str, uuids: &[&str]) -> BluetoothLeDevice {
        BluetoothLeDevice {
            address: address.to_string(),
            name: Some(format!("dev-{}", address)),
            uuids: uuids.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn scanning_mock(devices: Vec<BluetoothLeDevice>) -> MockNativeBle {
        let mut native = MockNativeBle::new();
        native.expect_start_scan().returning(|_| Ok(()));
        native
            .expect_peripherals()
            .returning(move || Ok(devices.clone()));
        native.expect_stop_scan().times(1).returning(|| Ok(()));
        native
    }

    fn host(native: MockNativeBle, bus: Arc<LocalEventBus>) -> BleHost {
        BleHost::new(BridgeConfig::default(), Arc::new(native), bus).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = BridgeConfig {
            scan_poll_interval_ms: 0,
            ..BridgeConfig::default()
        };
        let result = BleHost::new(
            config,
            Arc::new(MockNativeBle::new()),
            Arc::new(LocalEventBus::new()),
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_commands_require_init() {
        let bus = Arc::new(LocalEventBus::new());
        let host = host(MockNativeBle::new(), bus);

        assert_eq!(
            host.start_scan(ScanRequest::default()).await,
            Err(HostError::NotInitialized)
        );
        assert_eq!(
            host.connect(ConnectRequest {
                address: "addr1".into(),
                timeout: None
            })
            .await,
            Err(HostError::NotInitialized)
        );
        assert!(!host.is_scanning());
    }

    #[tokio::test]
    async fn test_init_without_gate_succeeds() {
        let bus = Arc::new(LocalEventBus::new());
        let host = host(MockNativeBle::new(), bus);

        assert!(host.init(InitRequest::default()).await.is_ok());
        assert!(host.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_emits_each_device_once_then_stop() {
        let bus = Arc::new(LocalEventBus::new());
        let native = scanning_mock(vec![device("addr1", &[]), device("addr2", &[])]);
        let host = host(native, bus.clone());
        host.init(InitRequest::default()).await.unwrap();

        let mut discovered = bus.listen(DEVICE_DISCOVERED_EVENT).await.unwrap();
        let mut stopped = bus.listen(SCAN_STOPPED_EVENT).await.unwrap();

        host.start_scan(ScanRequest::from(1000u64)).await.unwrap();
        assert!(host.is_scanning());

        assert_eq!(stopped.receiver.next().await, Some(Value::Null));
        assert!(!host.is_scanning());

        let mut addresses = Vec::new();
        while let Ok(Some(payload)) = discovered.receiver.try_next() {
            let device: BluetoothLeDevice = serde_json::from_value(payload).unwrap();
            addresses.push(device.address);
        }
        assert_eq!(addresses, vec!["addr1", "addr2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_applies_filter() {
        let bus = Arc::new(LocalEventBus::new());
        let native = scanning_mock(vec![device("hr", &["180d"]), device("battery", &["180f"])]);
        let host = host(native, bus.clone());
        host.init(InitRequest::default()).await.unwrap();

        let mut discovered = bus.listen(DEVICE_DISCOVERED_EVENT).await.unwrap();
        let mut stopped = bus.listen(SCAN_STOPPED_EVENT).await.unwrap();

        let request = ScanRequest::from(500u64)
            .with_filter(crate::models::ScanFilter::new(vec!["180D".to_string()]));
        host.start_scan(request).await.unwrap();
        stopped.receiver.next().await;

        let payload = discovered.receiver.try_next().unwrap().unwrap();
        assert_eq!(payload["address"], "hr");
        assert!(discovered.receiver.try_next().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_scan_rejected_while_running() {
        let bus = Arc::new(LocalEventBus::new());
        let host = host(scanning_mock(vec![]), bus.clone());
        host.init(InitRequest::default()).await.unwrap();

        let mut stopped = bus.listen(SCAN_STOPPED_EVENT).await.unwrap();
        host.start_scan(ScanRequest::from(1000u64)).await.unwrap();
        assert_eq!(
            host.start_scan(ScanRequest::default()).await,
            Err(HostError::ScanInProgress)
        );

        stopped.receiver.next().await;
        assert!(!host.is_scanning());
    }

    #[tokio::test]
    async fn test_native_start_failure_rolls_back_scanning() {
        let bus = Arc::new(LocalEventBus::new());
        let mut native = MockNativeBle::new();
        native
            .expect_start_scan()
            .returning(|_| Err(NativeError::NoAdapter));
        let host = host(native, bus);
        host.init(InitRequest::default()).await.unwrap();

        assert_eq!(
            host.start_scan(ScanRequest::default()).await,
            Err(HostError::Native(NativeError::NoAdapter))
        );
        assert!(!host.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_claim_clears_flag_on_drop() {
        let bus = Arc::new(LocalEventBus::new());
        let mut native = MockNativeBle::new();
        native
            .expect_start_scan()
            .times(1)
            .returning(|_| Err(NativeError::NoAdapter));
        let host = Arc::new(host(native, bus));
        host.init(InitRequest::default()).await.unwrap();

        let claim = ScanClaim::acquire(&host.state).unwrap();
        assert!(host.is_scanning());
        assert_eq!(
            host.start_scan(ScanRequest::default()).await,
            Err(HostError::ScanInProgress)
        );
        drop(claim);
        assert!(!host.is_scanning());

        // the native start runs once the flag is free again
        assert!(matches!(
            host.start_scan(ScanRequest::default()).await,
            Err(HostError::Native(_))
        ));
        assert!(!host.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_scan_uses_scoped_events() {
        let bus = Arc::new(LocalEventBus::new());
        let host = host(scanning_mock(vec![device("addr1", &[])]), bus.clone());
        host.init(InitRequest::default()).await.unwrap();

        let token = SessionToken::new();
        let mut global = bus.listen(DEVICE_DISCOVERED_EVENT).await.unwrap();
        let mut scoped = bus
            .listen(&scoped_event(DEVICE_DISCOVERED_EVENT, Some(&token)))
            .await
            .unwrap();
        let mut stopped = bus
            .listen(&scoped_event(SCAN_STOPPED_EVENT, Some(&token)))
            .await
            .unwrap();

        let request = ScanRequest {
            timeout: Some(300),
            filter: None,
            session: Some(token.to_string()),
        };
        host.start_scan(request).await.unwrap();
        stopped.receiver.next().await;

        assert!(scoped.receiver.try_next().unwrap().is_some());
        assert!(global.receiver.try_next().is_err());
    }

    #[tokio::test]
    async fn test_connect_tracks_devices() {
        let bus = Arc::new(LocalEventBus::new());
        let mut native = MockNativeBle::new();
        native
            .expect_connect()
            .withf(|address: &str| address == "addr1")
            .times(1)
            .returning(|_| Ok(()));
        let host = host(native, bus);
        host.init(InitRequest::default()).await.unwrap();

        let request = ConnectRequest {
            address: "addr1".into(),
            timeout: Some(5000),
        };
        host.connect(request.clone()).await.unwrap();
        assert_eq!(host.connected_devices(), vec!["addr1"]);
        assert_eq!(host.connect(request).await, Err(HostError::AlreadyConnected));
    }

    #[tokio::test]
    async fn test_handle_maps_errors_to_rejections() {
        let bus = Arc::new(LocalEventBus::new());
        let host = host(MockNativeBle::new(), bus);

        let err = host
            .handle(Command::StartScan, json!({ "timeout": 5000 }))
            .await
            .unwrap_err();
        assert_eq!(err.rejection_code(), Some(codes::NOT_INITIALIZED));
    }

    #[tokio::test]
    async fn test_handle_rejects_malformed_payload() {
        let bus = Arc::new(LocalEventBus::new());
        let host = host(MockNativeBle::new(), bus);

        let err = host
            .handle(Command::Connect, json!({ "timeout": 5 }))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPayload { .. }));
    }

    #[tokio::test]
    async fn test_handle_get_services_encodes_result() {
        let bus = Arc::new(LocalEventBus::new());
        let mut native = MockNativeBle::new();
        native.expect_services().returning(|_| {
            Ok(vec![Service {
                uuid: "180d".into(),
                primary: true,
                characteristics: vec![],
            }])
        });
        let host = host(native, bus);
        host.handle(Command::Init, Value::Null).await.unwrap();

        let result = host
            .handle(Command::GetServices, json!({ "address": "addr1" }))
            .await
            .unwrap();
        assert_eq!(result, json!([{ "uuid": "180d", "primary": true, "characteristics": [] }]));
    }
}

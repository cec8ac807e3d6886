//! Webview-side client
//!
//! `BluetoothLeClient` turns the four plugin commands into typed calls and
//! scans into streams. It only needs a [`CommandInvoker`] and an [`EventBus`],
//! so the same client drives a host in another process or, through
//! [`BluetoothLeClient::in_process`], a [`BleHost`] in this one.

pub mod barrier;
pub mod scan;

pub use barrier::{acquire_listeners, ListenerSet};
pub use scan::{Scan, ScanPhase, ScanStream};

use crate::config::{BridgeConfig, ConfigError};
use crate::host::BleHost;
use crate::models::{ConnectRequest, GetServicesRequest, InitRequest, ScanRequest, Service};
use crate::protocol::{
    codes, Command, CommandInvoker, EventBus, LocalEventBus, LoopbackInvoker, ProtocolError,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// Init rejected by the permission gate. The message names every
    /// permission that was not granted.
    #[error("{0}")]
    PermissionDenied(String),

    #[error("Scan failed to start: {0}")]
    ScanStart(String),

    #[error("{command} rejected: {message}")]
    Rejected { command: String, message: String },

    #[error(transparent)]
    Dispatch(#[from] ProtocolError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Event listener closed before the scan stopped")]
    ListenerClosed,
}

impl BridgeError {
    fn from_command(command: Command, err: ProtocolError) -> Self {
        match err {
            ProtocolError::Rejected { code, message } if code == codes::PERMISSION_DENIED => {
                Self::PermissionDenied(message)
            }
            ProtocolError::Rejected { message, .. } => Self::Rejected {
                command: command.to_string(),
                message,
            },
            other => Self::Dispatch(other),
        }
    }

    pub(crate) fn from_scan_start(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Rejected { message, .. } => Self::ScanStart(message),
            other => Self::Dispatch(other),
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

#[derive(Clone)]
pub struct BluetoothLeClient {
    config: BridgeConfig,
    invoker: Arc<dyn CommandInvoker>,
    bus: Arc<dyn EventBus>,
}

impl BluetoothLeClient {
    pub fn new(
        config: BridgeConfig,
        invoker: Arc<dyn CommandInvoker>,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            config,
            invoker,
            bus,
        })
    }

    /// Client wired straight to `host`. `bus` must be the emitter the host
    /// was built with.
    pub fn in_process(
        config: BridgeConfig,
        host: Arc<BleHost>,
        bus: Arc<LocalEventBus>,
    ) -> Result<Self, ConfigError> {
        let invoker = Arc::new(LoopbackInvoker::new(&config.plugin_name, host));
        Self::new(config, invoker, bus)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    async fn call<T: Serialize>(&self, command: Command, request: &T) -> Result<Value, BridgeError> {
        let payload =
            serde_json::to_value(request).map_err(|e| ProtocolError::MalformedPayload {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Invoking {}", command);
        self.invoker
            .invoke(&self.config.command_name(command), payload)
            .await
            .map_err(|e| BridgeError::from_command(command, e))
    }

    /// Resolves once the host has every permission it needs. May wait
    /// indefinitely on the platform permission prompt.
    pub async fn init(&self, request: InitRequest) -> Result<(), BridgeError> {
        self.call(Command::Init, &request).await.map(|_| ())
    }

    /// A cold scan. Nothing is sent until the returned scan is subscribed.
    /// Accepts a full [`ScanRequest`] or a bare timeout.
    pub fn scan(&self, request: impl Into<ScanRequest>) -> Scan {
        Scan::new(
            self.invoker.clone(),
            self.bus.clone(),
            self.config.command_name(Command::StartScan),
            request.into(),
            self.config.session_scoped_events,
        )
    }

    pub async fn connect(&self, request: ConnectRequest) -> Result<(), BridgeError> {
        self.call(Command::Connect, &request).await.map(|_| ())
    }

    pub async fn get_services(&self, address: &str) -> Result<Vec<Service>, BridgeError> {
        let request = GetServicesRequest {
            address: address.to_string(),
        };
        let value = self.call(Command::GetServices, &request).await?;
        serde_json::from_value(value).map_err(|e| BridgeError::InvalidResponse(e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

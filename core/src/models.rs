// Wire payloads shared by the host and the bridge.
//
// Every type here crosses the command/event boundary as JSON, so field names
// are camelCase on the wire.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// INIT
// ============================================================================

/// Android-scoped init options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidInitRequest {
    /// Request location permissions because the app derives location from scans.
    #[serde(default)]
    pub for_location: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android: Option<AndroidInitRequest>,
}

impl InitRequest {
    pub fn for_location(for_location: bool) -> Self {
        Self {
            android: Some(AndroidInitRequest { for_location }),
        }
    }
}

// ============================================================================
// SCAN
// ============================================================================

/// Restricts a scan to devices advertising at least one of `services`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFilter {
    #[serde(default)]
    pub services: Vec<String>,
}

impl ScanFilter {
    pub fn new(services: Vec<String>) -> Self {
        Self { services }
    }

    /// An empty filter matches every device. Service ids compare ASCII
    /// case-insensitively since platforms disagree on UUID casing.
    pub fn matches(&self, device: &BluetoothLeDevice) -> bool {
        if self.services.is_empty() {
            return true;
        }
        device.uuids.iter().any(|advertised| {
            self.services
                .iter()
                .any(|wanted| wanted.eq_ignore_ascii_case(advertised))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    /// Scan duration in milliseconds. The host default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<ScanFilter>,
    /// Session token selecting the per-session event channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl ScanRequest {
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Legacy timeout-only form.
impl From<u64> for ScanRequest {
    fn from(timeout_ms: u64) -> Self {
        Self::default().with_timeout(timeout_ms)
    }
}

impl From<Duration> for ScanRequest {
    fn from(timeout: Duration) -> Self {
        Self::default().with_timeout(timeout.as_millis() as u64)
    }
}

/// Accepted shapes of a start_scan payload: a bare timeout number from old
/// clients, or the structured request.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ScanPayload {
    Legacy(u64),
    Structured(ScanRequest),
}

impl From<ScanPayload> for ScanRequest {
    fn from(payload: ScanPayload) -> Self {
        match payload {
            ScanPayload::Legacy(timeout_ms) => ScanRequest::from(timeout_ms),
            ScanPayload::Structured(request) => request,
        }
    }
}

/// A device reported during a scan. The same address may be reported again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BluetoothLeDevice {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub uuids: Vec<String>,
}

// ============================================================================
// CONNECT / SERVICES
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetServicesRequest {
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub uuid: String,
    pub characteristic_uuid: String,
    pub service_uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Characteristic {
    pub uuid: String,
    pub service_uuid: String,
    /// GATT characteristic property bit flags.
    pub properties: u8,
    #[serde(default)]
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub uuid: String,
    pub primary: bool,
    #[serde(default)]
    pub characteristics: Vec<Characteristic>,
}

//! Command/event boundary between the webview bridge and the host.
//!
//! Commands are namespaced, carry a JSON payload and settle exactly once with
//! a value or an error. Events are named broadcasts with a JSON payload; every
//! listener of a name gets its own FIFO channel and nothing is ordered across
//! names.

pub mod local;

use async_trait::async_trait;
use futures::channel::mpsc::UnboundedReceiver;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub use local::{LocalEventBus, LoopbackInvoker};

pub const DEVICE_DISCOVERED_EVENT: &str = "ble_device_discovered";
pub const SCAN_STOPPED_EVENT: &str = "ble_stop_scan";

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Stable rejection codes carried by [`ProtocolError::Rejected`].
pub mod codes {
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const NOT_INITIALIZED: &str = "NOT_INITIALIZED";
    pub const SCAN_IN_PROGRESS: &str = "SCAN_IN_PROGRESS";
    pub const ALREADY_CONNECTED: &str = "ALREADY_CONNECTED";
    pub const NATIVE_ERROR: &str = "NATIVE_ERROR";
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("Command dispatch failed: {0}")]
    Dispatch(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Malformed payload for {command}: {reason}")]
    MalformedPayload { command: String, reason: String },

    /// The handler ran and rejected the call.
    #[error("{message}")]
    Rejected { code: String, message: String },

    #[error("Invalid event name: {0}")]
    InvalidEventName(String),
}

impl ProtocolError {
    pub fn rejected(code: &str, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn rejection_code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Init,
    StartScan,
    Connect,
    GetServices,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::Init,
        Command::StartScan,
        Command::Connect,
        Command::GetServices,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::StartScan => "start_scan",
            Self::Connect => "connect",
            Self::GetServices => "get_services",
        }
    }

    /// Resolves a bare command name. `init_ble` is the mobile plugin's name
    /// for `init`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "init" | "init_ble" => Some(Self::Init),
            "start_scan" => Some(Self::StartScan),
            "connect" => Some(Self::Connect),
            "get_services" => Some(Self::GetServices),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SESSIONS & EVENT NAMES
// ============================================================================

/// Token naming the event channels of one scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for SessionToken {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ProtocolError::InvalidEventName(format!("session {}: {}", s, e)))
    }
}

/// Event name for `base`, scoped to `session` when one is given.
pub fn scoped_event(base: &str, session: Option<&SessionToken>) -> String {
    match session {
        Some(token) => format!("{}:{}", base, token),
        None => base.to_string(),
    }
}

/// Event names may only use alphanumerics, `-`, `/`, `:` and `_`.
pub fn validate_event_name(event: &str) -> Result<(), ProtocolError> {
    let valid = !event.is_empty()
        && event
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '/' | ':' | '_'));
    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidEventName(event.to_string()))
    }
}

// ============================================================================
// TRAITS
// ============================================================================

pub type ListenerId = u64;

/// A registered listener. Payloads arrive in emission order.
#[derive(Debug)]
pub struct EventListener {
    pub id: ListenerId,
    pub event: String,
    pub receiver: UnboundedReceiver<Value>,
}

/// Webview side of the command channel.
#[async_trait]
pub trait CommandInvoker: Send + Sync {
    /// `command` is the full namespaced name, e.g. `plugin:taurine-bluetooth-le|init`.
    async fn invoke(&self, command: &str, payload: Value) -> Result<Value, ProtocolError>;
}

/// Host side of the command channel.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command, payload: Value) -> Result<Value, ProtocolError>;
}

/// Webview side of the event channel.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Registration is asynchronous; events emitted before it completes are
    /// not delivered to this listener.
    async fn listen(&self, event: &str) -> Result<EventListener, ProtocolError>;

    fn unlisten(&self, event: &str, id: ListenerId);
}

/// Host side of the event channel.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: &str, payload: Value) -> Result<(), ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names_roundtrip() {
        for command in Command::ALL {
            assert_eq!(Command::from_name(command.as_str()), Some(command));
        }
        assert_eq!(Command::from_name("init_ble"), Some(Command::Init));
        assert_eq!(Command::from_name("stop_scan"), None);
    }

    #[test]
    fn test_scoped_event_names() {
        assert_eq!(scoped_event(DEVICE_DISCOVERED_EVENT, None), "ble_device_discovered");

        let token = SessionToken::new();
        let scoped = scoped_event(SCAN_STOPPED_EVENT, Some(&token));
        assert!(scoped.starts_with("ble_stop_scan:"));
        assert!(validate_event_name(&scoped).is_ok());
    }

    #[test]
    fn test_session_tokens_are_unique_and_parse() {
        let a = SessionToken::new();
        let b = SessionToken::new();
        assert_ne!(a, b);
        assert_ne!(SessionToken::default(), a);

        let parsed: SessionToken = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
        assert!("not-a-token".parse::<SessionToken>().is_err());
    }

    #[test]
    fn test_event_name_validation() {
        assert!(validate_event_name("ble_device_discovered").is_ok());
        assert!(validate_event_name("").is_err());
        assert!(validate_event_name("has space").is_err());
        assert!(validate_event_name("plugin|x").is_err());
    }

    #[test]
    fn test_rejection_code() {
        let err = ProtocolError::rejected(codes::SCAN_IN_PROGRESS, "Scan in progress");
        assert_eq!(err.rejection_code(), Some(codes::SCAN_IN_PROGRESS));
        assert_eq!(err.to_string(), "Scan in progress");
        assert_eq!(ProtocolError::Dispatch("x".into()).rejection_code(), None);
    }
}

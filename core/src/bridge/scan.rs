//! Scan sessions as streams
//!
//! [`Scan`] is a cold description of a scan. Every [`Scan::subscribe`] yields a
//! fresh [`ScanStream`] that, when first polled, registers its listeners, sends
//! start_scan and then forwards discovered devices until the host reports the
//! scan stopped.
//!
//! ```text
//! Idle ──poll──> Starting ──ack──> Active ──stop──> Completed
//!                    │                │
//!                    └── error ───────┴──> Completed
//! ```

use super::barrier::{acquire_listeners, ListenerSet};
use super::BridgeError;
use crate::models::{BluetoothLeDevice, ScanRequest};
use crate::protocol::{
    scoped_event, CommandInvoker, EventBus, ProtocolError, SessionToken, DEVICE_DISCOVERED_EVENT,
    SCAN_STOPPED_EVENT,
};
use futures::future::BoxFuture;
use futures::stream::FusedStream;
use futures::{FutureExt, Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

const DISCOVERED: usize = 0;
const STOPPED: usize = 1;

/// Lifecycle of a single scan subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Created, never polled. No command has been sent.
    Idle,
    /// Registering listeners and waiting for the start_scan ack.
    Starting,
    /// Forwarding discovered devices.
    Active,
    /// Stop received. Draining devices queued ahead of it.
    Stopping,
    /// Terminal.
    Completed,
}

/// A scan that has not started. Cloning is cheap and every subscription runs
/// its own session.
#[derive(Clone)]
pub struct Scan {
    invoker: Arc<dyn CommandInvoker>,
    bus: Arc<dyn EventBus>,
    command: String,
    request: ScanRequest,
    session_scoped: bool,
}

impl Scan {
    pub(crate) fn new(
        invoker: Arc<dyn CommandInvoker>,
        bus: Arc<dyn EventBus>,
        command: String,
        request: ScanRequest,
        session_scoped: bool,
    ) -> Self {
        Self {
            invoker,
            bus,
            command,
            request,
            session_scoped,
        }
    }

    pub fn request(&self) -> &ScanRequest {
        &self.request
    }

    pub fn subscribe(&self) -> ScanStream {
        ScanStream {
            scan: self.clone(),
            state: State::Idle,
        }
    }
}

impl fmt::Debug for Scan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scan")
            .field("command", &self.command)
            .field("request", &self.request)
            .field("session_scoped", &self.session_scoped)
            .finish()
    }
}

enum State {
    Idle,
    Starting(BoxFuture<'static, Result<ListenerSet, BridgeError>>),
    Active {
        listeners: ListenerSet,
        stopping: bool,
    },
    Completed,
}

/// One scan session. Dropping it in any phase releases its listeners.
pub struct ScanStream {
    scan: Scan,
    state: State,
}

impl ScanStream {
    pub fn phase(&self) -> ScanPhase {
        match self.state {
            State::Idle => ScanPhase::Idle,
            State::Starting(_) => ScanPhase::Starting,
            State::Active { stopping: false, .. } => ScanPhase::Active,
            State::Active { stopping: true, .. } => ScanPhase::Stopping,
            State::Completed => ScanPhase::Completed,
        }
    }

    fn start(&self) -> BoxFuture<'static, Result<ListenerSet, BridgeError>> {
        let mut request = self.scan.request.clone();
        let session = if self.scan.session_scoped {
            let token = SessionToken::new();
            request.session = Some(token.to_string());
            Some(token)
        } else {
            None
        };

        let events = vec![
            scoped_event(DEVICE_DISCOVERED_EVENT, session.as_ref()),
            scoped_event(SCAN_STOPPED_EVENT, session.as_ref()),
        ];
        start_session(
            self.scan.invoker.clone(),
            self.scan.bus.clone(),
            self.scan.command.clone(),
            request,
            events,
        )
        .boxed()
    }
}

async fn start_session(
    invoker: Arc<dyn CommandInvoker>,
    bus: Arc<dyn EventBus>,
    command: String,
    request: ScanRequest,
    events: Vec<String>,
) -> Result<ListenerSet, BridgeError> {
    // Listeners go up before the command so no event of this session is missed.
    let listeners = acquire_listeners(bus, &events).await?;

    let payload = serde_json::to_value(&request).map_err(|e| {
        BridgeError::Dispatch(ProtocolError::MalformedPayload {
            command: command.clone(),
            reason: e.to_string(),
        })
    })?;

    debug!("Sending {} with events on {}", command, events[DISCOVERED]);
    invoker
        .invoke(&command, payload)
        .await
        .map_err(BridgeError::from_scan_start)?;

    Ok(listeners)
}

fn poll_channel(
    listeners: &mut ListenerSet,
    index: usize,
    cx: &mut Context<'_>,
) -> Poll<Option<Value>> {
    match listeners.receiver_mut(index) {
        Some(receiver) => receiver.poll_next_unpin(cx),
        None => Poll::Ready(None),
    }
}

impl Stream for ScanStream {
    type Item = Result<BluetoothLeDevice, BridgeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                State::Idle => {
                    this.state = State::Starting(this.start());
                }
                State::Starting(start) => match start.poll_unpin(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(listeners)) => {
                        debug!("Scan acknowledged");
                        this.state = State::Active {
                            listeners,
                            stopping: false,
                        };
                    }
                    Poll::Ready(Err(e)) => {
                        warn!("Scan failed to start: {}", e);
                        this.state = State::Completed;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                State::Active {
                    listeners,
                    stopping,
                } => {
                    if !*stopping {
                        match poll_channel(listeners, STOPPED, cx) {
                            Poll::Ready(Some(_)) => {
                                debug!("Scan stopped, draining queued devices");
                                *stopping = true;
                            }
                            Poll::Ready(None) => {
                                this.state = State::Completed;
                                return Poll::Ready(Some(Err(BridgeError::ListenerClosed)));
                            }
                            Poll::Pending => {}
                        }
                    }

                    // Devices queued ahead of the stop event are delivered first.
                    match poll_channel(listeners, DISCOVERED, cx) {
                        Poll::Ready(Some(payload)) => {
                            match serde_json::from_value::<BluetoothLeDevice>(payload) {
                                Ok(device) => return Poll::Ready(Some(Ok(device))),
                                Err(e) => {
                                    warn!("Dropping malformed device event: {}", e);
                                    continue;
                                }
                            }
                        }
                        Poll::Ready(None) if !*stopping => {
                            this.state = State::Completed;
                            return Poll::Ready(Some(Err(BridgeError::ListenerClosed)));
                        }
                        Poll::Ready(None) | Poll::Pending if *stopping => {
                            debug!("Scan completed");
                            this.state = State::Completed;
                            return Poll::Ready(None);
                        }
                        _ => return Poll::Pending,
                    }
                }
                State::Completed => return Poll::Ready(None),
            }
        }
    }
}

impl FusedStream for ScanStream {
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Completed)
    }
}

impl fmt::Debug for ScanStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanStream")
            .field("scan", &self.scan)
            .field("phase", &self.phase())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

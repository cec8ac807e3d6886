// Listener acquisition barrier.
//
// A scan session needs several event listeners registered before it may send
// its start command. `acquire_listeners` starts every registration at once and
// waits for all of them to settle, so a session never proceeds with a listener
// still registering and never leaks one that did register when another failed.

use crate::protocol::{EventBus, EventListener, ProtocolError};
use futures::channel::mpsc::UnboundedReceiver;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{trace, warn};

/// Listeners owned by one session. Dropping the set unlistens all of them.
pub struct ListenerSet {
    bus: Arc<dyn EventBus>,
    listeners: Vec<EventListener>,
}

impl ListenerSet {
    fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            listeners: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Event names in acquisition order.
    pub fn events(&self) -> Vec<&str> {
        self.listeners.iter().map(|l| l.event.as_str()).collect()
    }

    /// Receiver of the listener at `index`, in the order the events were requested.
    pub fn receiver_mut(&mut self, index: usize) -> Option<&mut UnboundedReceiver<Value>> {
        self.listeners.get_mut(index).map(|l| &mut l.receiver)
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        for listener in self.listeners.drain(..) {
            trace!("Releasing listener {} on {}", listener.id, listener.event);
            self.bus.unlisten(&listener.event, listener.id);
        }
    }
}

/// Registers a listener for each of `events` and waits until every
/// registration has settled. Fails with the first error, releasing the
/// listeners that did register.
pub async fn acquire_listeners(
    bus: Arc<dyn EventBus>,
    events: &[String],
) -> Result<ListenerSet, ProtocolError> {
    let results = join_all(events.iter().map(|event| bus.listen(event))).await;

    let mut set = ListenerSet::new(bus);
    let mut first_error = None;
    for result in results {
        match result {
            Ok(listener) => set.listeners.push(listener),
            Err(e) => {
                warn!("Listener registration failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(set),
    }
}

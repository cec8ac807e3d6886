// In-process command and event channels.
//
// `LocalEventBus` is both the host's emitter and the bridge's listener
// registry. `LoopbackInvoker` routes namespaced commands straight to a
// `CommandHandler`. Together they let a host and a bridge run in one process,
// which is how the desktop harness and the tests drive the plugin.

use super::{
    validate_event_name, Command, CommandHandler, CommandInvoker, EventBus, EventEmitter,
    EventListener, ListenerId, ProtocolError,
};
use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Subscribers = Vec<(ListenerId, UnboundedSender<Value>)>;

/// Broadcast event registry keyed by event name.
#[derive(Debug, Default)]
pub struct LocalEventBus {
    listeners: RwLock<HashMap<String, Subscribers>>,
    next_id: AtomicU64,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .read()
            .get(event)
            .map(|subs| subs.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Live listeners across all event names.
    pub fn total_listeners(&self) -> usize {
        self.listeners
            .read()
            .values()
            .flat_map(|subs| subs.iter())
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn listen(&self, event: &str) -> Result<EventListener, ProtocolError> {
        validate_event_name(event)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded::<Value>();
        self.listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, tx));

        tracing::trace!("Listener {} registered for {}", id, event);
        Ok(EventListener {
            id,
            event: event.to_string(),
            receiver: rx,
        })
    }

    fn unlisten(&self, event: &str, id: ListenerId) {
        let mut listeners = self.listeners.write();
        if let Some(subs) = listeners.get_mut(event) {
            subs.retain(|(listener_id, _)| *listener_id != id);
            if subs.is_empty() {
                listeners.remove(event);
            }
        }
        tracing::trace!("Listener {} removed from {}", id, event);
    }
}

impl EventEmitter for LocalEventBus {
    fn emit(&self, event: &str, payload: Value) -> Result<(), ProtocolError> {
        validate_event_name(event)?;

        // Clone the senders under a short read lock, then send without it.
        let senders: Subscribers = match self.listeners.read().get(event) {
            Some(subs) => subs.clone(),
            None => return Ok(()),
        };

        let mut closed = Vec::new();
        for (id, tx) in senders {
            if tx.unbounded_send(payload.clone()).is_err() {
                closed.push(id);
            }
        }

        if !closed.is_empty() {
            let mut listeners = self.listeners.write();
            if let Some(subs) = listeners.get_mut(event) {
                subs.retain(|(id, _)| !closed.contains(id));
                if subs.is_empty() {
                    listeners.remove(event);
                }
            }
        }
        Ok(())
    }
}

/// Routes `plugin:<name>|<command>` invocations to a handler in this process.
pub struct LoopbackInvoker {
    prefix: String,
    handler: Arc<dyn CommandHandler>,
}

impl LoopbackInvoker {
    pub fn new(plugin_name: &str, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            prefix: format!("plugin:{}|", plugin_name),
            handler,
        }
    }

    fn resolve(&self, command: &str) -> Result<Command, ProtocolError> {
        command
            .strip_prefix(&self.prefix)
            .and_then(Command::from_name)
            .ok_or_else(|| ProtocolError::UnknownCommand(command.to_string()))
    }
}

#[async_trait]
impl CommandInvoker for LoopbackInvoker {
    async fn invoke(&self, command: &str, payload: Value) -> Result<Value, ProtocolError> {
        let resolved = self.resolve(command)?;
        tracing::debug!("Invoking {}", resolved);
        self.handler.handle(resolved, payload).await
    }
}

// Host-side scan session: polls the native peripheral list until the timeout,
// emits each newly seen device once, then emits exactly one stop event.

use super::native::NativeBle;
use super::HostState;
use crate::models::ScanFilter;
use crate::protocol::EventEmitter;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

pub(crate) struct ScanWorker {
    pub native: Arc<dyn NativeBle>,
    pub emitter: Arc<dyn EventEmitter>,
    pub state: Arc<Mutex<HostState>>,
    pub filter: ScanFilter,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub discovered_event: String,
    pub stopped_event: String,
}

impl ScanWorker {
    pub async fn run(self) {
        let deadline = Instant::now() + self.timeout;
        let mut seen: HashSet<String> = HashSet::new();

        info!(
            "Scan session started ({}ms, events on {})",
            self.timeout.as_millis(),
            self.discovered_event
        );

        while Instant::now() < deadline {
            match self.native.peripherals().await {
                Ok(devices) => {
                    for device in devices {
                        if !self.filter.matches(&device) || seen.contains(&device.address) {
                            continue;
                        }
                        seen.insert(device.address.clone());
                        debug!("Discovered {}", device.address);

                        match serde_json::to_value(&device) {
                            Ok(payload) => {
                                if let Err(e) = self.emitter.emit(&self.discovered_event, payload) {
                                    warn!("Failed to emit discovered device: {}", e);
                                }
                            }
                            Err(e) => warn!("Failed to encode device {}: {}", device.address, e),
                        }
                    }
                }
                Err(e) => warn!("Peripheral poll failed: {}", e),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(self.poll_interval.min(remaining)).await;
        }

        self.state.lock().scanning = false;

        if let Err(e) = self.native.stop_scan().await {
            warn!("Failed to stop native scan: {}", e);
        }

        if let Err(e) = self.emitter.emit(&self.stopped_event, serde_json::Value::Null) {
            warn!("Failed to emit scan stop: {}", e);
        }

        info!("Scan session finished, {} devices reported", seen.len());
    }
}

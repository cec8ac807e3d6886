// Permission resolution in front of every BLE command.
//
// The OS permission dialog answers through a deferred callback. Each init call
// registers its own pending context keyed by a request id, and the callback
// handed to the platform carries that id, so concurrent init calls never see
// each other's permission sets.

use super::table::{required_permissions, PermissionAlias, PermissionSet, PermissionState};
use crate::models::AndroidInitRequest;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type RequestId = Uuid;

type PendingMap = Mutex<HashMap<RequestId, oneshot::Sender<()>>>;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Missing permissions {}", join_aliases(.0))]
    Denied(Vec<PermissionAlias>),

    #[error("Permission request failed: {0}")]
    RequestFailed(String),

    #[error("Permission request {0} abandoned before the OS answered")]
    Abandoned(RequestId),
}

impl PermissionError {
    /// Aliases the OS did not grant, empty for other failures.
    pub fn missing(&self) -> &[PermissionAlias] {
        match self {
            Self::Denied(aliases) => aliases,
            _ => &[],
        }
    }
}

fn join_aliases(aliases: &[PermissionAlias]) -> String {
    aliases
        .iter()
        .map(|alias| alias.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// PLATFORM SHELL
// ============================================================================

/// OS permission API. Implemented by the mobile platform layer.
pub trait PermissionPlatform: Send + Sync {
    /// OS version, read at call time.
    fn sdk_version(&self) -> u32;

    /// Show the OS dialog for every alias in `request.permissions` and fire
    /// `request.callback()` once the OS answers. Must not block.
    fn request_permissions(&self, request: PermissionRequest) -> Result<(), PermissionError>;

    fn permission_state(&self, alias: PermissionAlias) -> PermissionState;
}

/// One OS permission request, handed to the platform.
#[derive(Debug)]
pub struct PermissionRequest {
    pub id: RequestId,
    pub permissions: PermissionSet,
    callback: PermissionCallback,
}

impl PermissionRequest {
    pub fn callback(&self) -> PermissionCallback {
        self.callback.clone()
    }
}

/// Completes the pending init call it was created for.
#[derive(Debug, Clone)]
pub struct PermissionCallback {
    id: RequestId,
    pending: Weak<PendingMap>,
}

impl PermissionCallback {
    pub fn request_id(&self) -> RequestId {
        self.id
    }

    /// Signals that the OS answered. Only the first call for a request wakes
    /// the init call; later calls return `false` and change nothing.
    pub fn fire(&self) -> bool {
        let Some(pending) = self.pending.upgrade() else {
            debug!("Permission callback {} fired after resolver shutdown", self.id);
            return false;
        };

        let sender = pending.lock().remove(&self.id);
        match sender {
            Some(tx) => tx.send(()).is_ok(),
            None => {
                debug!("Ignoring duplicate permission callback for {}", self.id);
                false
            }
        }
    }
}

/// Removes the pending context when the init call finishes or is dropped.
struct PendingGuard<'a> {
    id: RequestId,
    pending: &'a PendingMap,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct PermissionResolver {
    platform: Arc<dyn PermissionPlatform>,
    pending: Arc<PendingMap>,
}

impl PermissionResolver {
    pub fn new(platform: Arc<dyn PermissionPlatform>) -> Self {
        Self {
            platform,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Permission set the current OS version requires for `request`.
    pub fn required_for(&self, request: &AndroidInitRequest) -> PermissionSet {
        required_permissions(self.platform.sdk_version(), request.for_location)
    }

    /// Requests the required permissions and waits for the OS to answer.
    ///
    /// There is no timeout: a dialog the user never answers keeps this
    /// pending. Nothing is cached between calls.
    pub async fn init(&self, request: &AndroidInitRequest) -> Result<(), PermissionError> {
        let permissions = self.required_for(request);
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            id,
            pending: &*self.pending,
        };

        info!(
            "Requesting permissions {:?} (request {})",
            permissions.names(),
            id
        );

        self.platform.request_permissions(PermissionRequest {
            id,
            permissions: permissions.clone(),
            callback: PermissionCallback {
                id,
                pending: Arc::downgrade(&self.pending),
            },
        })?;

        rx.await.map_err(|_| PermissionError::Abandoned(id))?;

        self.verify(&permissions)
    }

    /// Re-queries the OS for every alias in `permissions`.
    pub fn verify(&self, permissions: &PermissionSet) -> Result<(), PermissionError> {
        let missing: Vec<PermissionAlias> = permissions
            .iter()
            .filter(|alias| self.platform.permission_state(*alias) != PermissionState::Granted)
            .collect();

        if missing.is_empty() {
            info!("All permissions granted: {:?}", permissions.names());
            Ok(())
        } else {
            let err = PermissionError::Denied(missing);
            warn!("{}", err);
            Err(err)
        }
    }

    /// Init calls still waiting for the OS.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use PermissionAlias::*;

    /// Records requests; the test decides when the OS answers.
    struct FakePlatform {
        sdk: u32,
        states: Mutex<HashMap<PermissionAlias, PermissionState>>,
        requests: Mutex<Vec<PermissionRequest>>,
        fail_requests: bool,
    }

    impl FakePlatform {
        fn new(sdk: u32) -> Self {
            Self {
                sdk,
                states: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
                fail_requests: false,
            }
        }

        fn set(&self, alias: PermissionAlias, state: PermissionState) {
            self.states.lock().insert(alias, state);
        }

        fn grant_all(&self) {
            for alias in [
                Bluetooth,
                BluetoothScan,
                BluetoothConnect,
                BluetoothAdmin,
                AccessFineLocation,
                AccessCoarseLocation,
            ] {
                self.set(alias, PermissionState::Granted);
            }
        }

        fn take_request(&self, index: usize) -> PermissionRequest {
            self.requests.lock().remove(index)
        }
    }

    impl PermissionPlatform for FakePlatform {
        fn sdk_version(&self) -> u32 {
            self.sdk
        }

        fn request_permissions(&self, request: PermissionRequest) -> Result<(), PermissionError> {
            if self.fail_requests {
                return Err(PermissionError::RequestFailed("no activity".to_string()));
            }
            self.requests.lock().push(request);
            Ok(())
        }

        fn permission_state(&self, alias: PermissionAlias) -> PermissionState {
            self.states
                .lock()
                .get(&alias)
                .copied()
                .unwrap_or(PermissionState::Prompt)
        }
    }

    #[tokio::test]
    async fn test_all_granted_resolves() {
        let platform = Arc::new(FakePlatform::new(33));
        platform.grant_all();
        let resolver = PermissionResolver::new(platform.clone());

        let request = AndroidInitRequest { for_location: true };
        let mut init = Box::pin(resolver.init(&request));
        assert!((&mut init).now_or_never().is_none());

        let sent = platform.take_request(0);
        assert_eq!(
            sent.permissions.as_slice(),
            &[BluetoothScan, BluetoothConnect, BluetoothAdmin, AccessFineLocation]
        );
        assert!(sent.callback().fire());

        assert_eq!(init.await, Ok(()));
        assert_eq!(resolver.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_denied_lists_exactly_missing_aliases() {
        let platform = Arc::new(FakePlatform::new(28));
        platform.set(Bluetooth, PermissionState::Granted);
        platform.set(AccessCoarseLocation, PermissionState::Denied);
        let resolver = PermissionResolver::new(platform.clone());

        let request = AndroidInitRequest::default();
        let mut init = Box::pin(resolver.init(&request));
        assert!((&mut init).now_or_never().is_none());
        platform.take_request(0).callback().fire();

        let err = init.await.unwrap_err();
        assert_eq!(err, PermissionError::Denied(vec![AccessCoarseLocation]));
        assert_eq!(err.to_string(), "Missing permissions ACCESS_COARSE_LOCATION");
    }

    #[tokio::test]
    async fn test_indeterminate_state_counts_as_missing() {
        let platform = Arc::new(FakePlatform::new(30));
        platform.set(Bluetooth, PermissionState::Granted);
        let resolver = PermissionResolver::new(platform.clone());

        let request = AndroidInitRequest::default();
        let mut init = Box::pin(resolver.init(&request));
        assert!((&mut init).now_or_never().is_none());
        platform.take_request(0).callback().fire();

        let err = init.await.unwrap_err();
        assert_eq!(err.missing(), &[AccessFineLocation]);
    }

    #[tokio::test]
    async fn test_duplicate_callback_is_ignored() {
        let platform = Arc::new(FakePlatform::new(31));
        platform.grant_all();
        let resolver = PermissionResolver::new(platform.clone());

        let request = AndroidInitRequest::default();
        let mut init = Box::pin(resolver.init(&request));
        assert!((&mut init).now_or_never().is_none());

        let callback = platform.take_request(0).callback();
        assert!(callback.fire());
        assert!(!callback.fire());
        assert_eq!(init.await, Ok(()));
        assert!(!callback.fire());
    }

    #[tokio::test]
    async fn test_concurrent_inits_resolve_independently() {
        let platform = Arc::new(FakePlatform::new(33));
        platform.set(BluetoothScan, PermissionState::Granted);
        platform.set(BluetoothConnect, PermissionState::Granted);
        platform.set(BluetoothAdmin, PermissionState::Granted);
        let resolver = PermissionResolver::new(platform.clone());

        let plain_request = AndroidInitRequest { for_location: false };
        let located_request = AndroidInitRequest { for_location: true };
        let mut plain = Box::pin(resolver.init(&plain_request));
        let mut located = Box::pin(resolver.init(&located_request));
        assert!((&mut plain).now_or_never().is_none());
        assert!((&mut located).now_or_never().is_none());
        assert_eq!(resolver.pending_requests(), 2);

        // Answer the second request first.
        let located_sent = platform.take_request(1);
        let plain_sent = platform.take_request(0);
        assert_ne!(located_sent.id, plain_sent.id);
        located_sent.callback().fire();
        plain_sent.callback().fire();

        assert_eq!(plain.await, Ok(()));
        assert_eq!(
            located.await,
            Err(PermissionError::Denied(vec![AccessFineLocation]))
        );
    }

    #[tokio::test]
    async fn test_dropped_init_clears_pending_context() {
        let platform = Arc::new(FakePlatform::new(33));
        let resolver = PermissionResolver::new(platform.clone());

        let request = AndroidInitRequest::default();
        let mut init = Box::pin(resolver.init(&request));
        assert!((&mut init).now_or_never().is_none());
        assert_eq!(resolver.pending_requests(), 1);

        drop(init);
        assert_eq!(resolver.pending_requests(), 0);
        assert!(!platform.take_request(0).callback().fire());
    }

    #[tokio::test]
    async fn test_request_failure_surfaces_and_clears_pending() {
        let mut platform = FakePlatform::new(33);
        platform.fail_requests = true;
        let resolver = PermissionResolver::new(Arc::new(platform));

        let result = resolver.init(&AndroidInitRequest::default()).await;
        assert!(matches!(result, Err(PermissionError::RequestFailed(_))));
        assert_eq!(resolver.pending_requests(), 0);
    }

    #[test]
    fn test_required_for_reads_sdk_version() {
        let resolver = PermissionResolver::new(Arc::new(FakePlatform::new(26)));
        assert_eq!(
            resolver
                .required_for(&AndroidInitRequest { for_location: true })
                .as_slice(),
            &[Bluetooth, AccessCoarseLocation]
        );
    }
}

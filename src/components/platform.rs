// Runtime seams for web push: capability flags, permission state, worker
// registration handles and the messaging SDK. Concrete implementations live
// with the embedding application (or in tests as fakes).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::config::{SdkConfig, VapidKey};
use super::content::{NativeNotification, PushMessage};
use super::registration::DeviceInfo;
use super::{BoxFuture, DeviceToken, PushError, PushResult};

/// Capability flags reported by the runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCapabilities {
    /// Notification permission API
    pub notification_api: bool,
    /// Worker registration API
    pub service_worker_api: bool,
    /// Push manager API
    pub push_manager_api: bool,
}

impl RuntimeCapabilities {
    pub fn full() -> Self {
        Self {
            notification_api: true,
            service_worker_api: true,
            push_manager_api: true,
        }
    }

    /// Push needs all three APIs; any one missing is a permanent no.
    pub fn supports_push(&self) -> bool {
        self.notification_api && self.service_worker_api && self.push_manager_api
    }

    /// Names of the missing APIs, for diagnostics
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.notification_api {
            missing.push("Notification");
        }
        if !self.service_worker_api {
            missing.push("serviceWorker");
        }
        if !self.push_manager_api {
            missing.push("PushManager");
        }
        missing
    }
}

/// Notification permission as owned by the runtime. Read-only to the manager
/// apart from the one-shot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// The user has not decided yet
    #[default]
    Default,
    Granted,
    Denied,
}

/// Lifecycle state of the worker behind a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerState {
    Installing,
    /// Installed, waiting for older clients to let go
    Waiting,
    Activating,
    Active,
    /// Replaced or failed install; will never activate
    Redundant,
}

impl WorkerState {
    /// States that will reach `Active` on their own
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            WorkerState::Installing | WorkerState::Waiting | WorkerState::Activating
        )
    }
}

/// Browser runtime hosting the page: capability detection, permission
/// prompt, worker registration and the page-level notification constructor.
pub trait PushRuntime: Send + Sync {
    fn capabilities(&self) -> RuntimeCapabilities;

    fn permission(&self) -> PermissionState;

    /// One-shot permission prompt. Resolves to the new permission state.
    fn request_permission(&self) -> BoxFuture<'_, PushResult<PermissionState>>;

    /// Register the worker script under `scope`
    fn register_worker(
        &self,
        script_url: String,
        scope: String,
    ) -> BoxFuture<'_, PushResult<Arc<dyn WorkerRegistration>>>;

    /// Look up an existing registration for `scope`
    fn registration(
        &self,
        scope: String,
    ) -> BoxFuture<'_, PushResult<Option<Arc<dyn WorkerRegistration>>>>;

    /// Page-level notification constructor, used when no worker can display
    fn show_page_notification(&self, notification: &NativeNotification) -> PushResult<()>;

    fn device_info(&self) -> DeviceInfo;
}

/// Handle to a registered background worker
pub trait WorkerRegistration: Send + Sync {
    fn scope(&self) -> String;

    fn state(&self) -> WorkerState;

    /// Resolves when the worker reports activation. Driven by the worker's
    /// state-change event, never by polling.
    fn activated(&self) -> BoxFuture<'_, PushResult<()>>;

    fn show_notification(&self, notification: NativeNotification) -> BoxFuture<'_, PushResult<()>>;

    /// Resolves to whether a registration was actually removed
    fn unregister(&self) -> BoxFuture<'_, PushResult<bool>>;
}

/// A worker registration known to be active.
///
/// The only way to build one is [`ActiveWorker::await_activation`], and
/// [`MessagingSdk::get_token`] only accepts this type, so a token can never be
/// requested against an installing or waiting worker.
#[derive(Clone)]
pub struct ActiveWorker {
    registration: Arc<dyn WorkerRegistration>,
}

impl ActiveWorker {
    /// Suspend until `registration` is active.
    pub async fn await_activation(registration: Arc<dyn WorkerRegistration>) -> PushResult<Self> {
        let state = registration.state();
        if state.is_pending() {
            tracing::info!(state = ?state, "worker not active yet, waiting for activation");
            registration.activated().await?;
        }

        match registration.state() {
            WorkerState::Active => Ok(Self { registration }),
            other => Err(PushError::Worker(format!(
                "worker at scope '{}' is {:?}, expected Active",
                registration.scope(),
                other
            ))),
        }
    }

    pub fn registration(&self) -> &Arc<dyn WorkerRegistration> {
        &self.registration
    }
}

impl std::fmt::Debug for ActiveWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveWorker")
            .field("scope", &self.registration.scope())
            .finish()
    }
}

/// Callback invoked by the SDK for each message that arrives while the page
/// is focused
pub type ForegroundHandler = Arc<dyn Fn(PushMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Messaging SDK. Initialization is process-wide state inside the SDK, so the
/// manager asks before initializing and never initializes twice.
pub trait MessagingSdk: Send + Sync {
    fn is_initialized(&self) -> bool;

    fn initialize(&self, config: &SdkConfig) -> PushResult<()>;

    /// Request a device token. `Ok(None)` means the SDK returned no token
    /// without raising.
    fn get_token<'a>(
        &'a self,
        vapid_key: &'a VapidKey,
        worker: &'a ActiveWorker,
    ) -> BoxFuture<'a, PushResult<Option<DeviceToken>>>;

    fn delete_token(&self) -> BoxFuture<'_, PushResult<bool>>;

    fn on_foreground_message(&self, handler: ForegroundHandler);
}

// Push notification components: identifiers, error taxonomy and the seams the
// manager talks through (browser runtime, worker registration, messaging SDK,
// registration service, UI surface)

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod config;
pub mod content;
pub mod lifecycle;
pub mod platform;
pub mod registration;

pub use config::{ManagerConfig, RemoteConfig, SdkConfig, VapidKey, is_placeholder};
pub use content::{
    ActionButton, NativeNotification, NotificationSurface, PushMessage, PushPayload, Toast,
    ToastKind,
};
pub use lifecycle::{EnableFailure, EnableLifecycle, EnableOutcome, EnableStage, StageTransition};
pub use platform::{
    ActiveWorker, ForegroundHandler, MessagingSdk, PermissionState, PushRuntime,
    RuntimeCapabilities, WorkerRegistration, WorkerState,
};
pub use registration::{
    DeviceInfo, PreferenceUpdate, PreferenceUpdateReceipt, Preferences, RegisterReceipt,
    RegistrationService, StatusReport,
};

/// Boxed future returned by every collaborator trait method
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifier for one run of the enable flow, recorded on its tracing span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(Uuid);

impl AttemptId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque credential from the push-delivery network identifying this
/// browser instance as a notification recipient.
///
/// Has no fixed lifetime; the provider may invalidate it at any time and that
/// is only observable through delivery failure or explicit deletion.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceToken(String);

impl DeviceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix safe to put in logs
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(12).collect();
        format!("{prefix}...")
    }
}

impl std::fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DeviceToken").field(&self.redacted()).finish()
    }
}

/// Error taxonomy for every manager operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// Runtime lacks the notification, worker or push API. Permanent.
    #[error("push notifications are not supported by this runtime")]
    Unsupported,
    /// Permission was denied earlier; the runtime will not prompt again.
    #[error("notification permission is blocked")]
    PermissionDenied,
    /// The one-shot prompt was dismissed or refused.
    #[error("notification permission was not granted")]
    PermissionDismissed,
    /// Remote config carries placeholder values; the backend is not set up yet.
    #[error("push messaging is not configured: {0}")]
    NotConfigured(String),
    /// Request never produced an HTTP response.
    #[error("transport failure: {0}")]
    Transport(String),
    /// Backend answered with a non-success status.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    /// Backend answered 2xx but reported `success: false`.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// Messaging SDK call failed.
    #[error("messaging SDK error ({code}): {message}")]
    Sdk { code: String, message: String },
    /// Worker registration, lookup or activation failed.
    #[error("worker registration error: {0}")]
    Worker(String),
    /// An operation needed a device token and none was available.
    #[error("no device token available")]
    NoToken,
    /// Another enable/disable/reset flow is in flight.
    #[error("another notification flow is already running")]
    Busy,
    /// The surrounding flow was abandoned before this step started.
    #[error("operation abandoned")]
    Cancelled,
}

impl PushError {
    /// Outcomes that are part of normal operation and should not be logged as
    /// errors.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            PushError::NotConfigured(_)
                | PushError::PermissionDenied
                | PushError::PermissionDismissed
                | PushError::Cancelled
                | PushError::Busy
        )
    }

    pub fn sdk(code: impl Into<String>, message: impl Into<String>) -> Self {
        PushError::Sdk {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Tagged result returned by every manager operation
pub type PushResult<T> = Result<T, PushError>;

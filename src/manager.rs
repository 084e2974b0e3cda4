// Notification lifecycle manager: capability gate, permission gate, messaging
// init, token acquisition, registration sync, foreground display, hard reset
// and the timed enable flow

use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::components::{
    ActiveWorker, AttemptId, BoxFuture, DeviceToken, EnableFailure, EnableLifecycle, EnableOutcome,
    EnableStage, ForegroundHandler, ManagerConfig, MessagingSdk, NativeNotification,
    NotificationSurface, PermissionState, PreferenceUpdate, PreferenceUpdateReceipt, Preferences,
    PushError, PushMessage, PushResult, PushRuntime, RegisterReceipt, RegistrationService,
    StatusReport, ToastKind, WorkerRegistration,
};

/// Process-local manager state. Nothing here is persisted.
#[derive(Default)]
struct ManagerState {
    current_token: Option<DeviceToken>,
    /// Mirrors the last known server-side preference
    is_enabled: bool,
    /// Messaging handle obtained (SDK initialized and usable)
    messaging_ready: bool,
    foreground_subscribed: bool,
    worker: Option<Arc<dyn WorkerRegistration>>,
    last_enable: Option<Arc<Mutex<EnableLifecycle>>>,
}

struct ManagerInner {
    config: ManagerConfig,
    runtime: Arc<dyn PushRuntime>,
    sdk: Arc<dyn MessagingSdk>,
    service: Arc<dyn RegistrationService>,
    surface: Arc<dyn NotificationSurface>,
    /// Evaluated once at construction
    is_supported: bool,
    state: Mutex<ManagerState>,
    /// Held by enable/disable/hard_reset/send_test; never waited on
    flow_lock: Arc<tokio::sync::Mutex<()>>,
    /// Taken around every side effect of a cancellable step and around the
    /// timeout cancelling it, so a step either lands before the timeout is
    /// reported or not at all
    live_gate: Mutex<()>,
}

/// Push notification lifecycle manager.
///
/// Cloning is cheap and every clone shares the same state. All collaborators
/// are injected, so the process-wide SDK and worker handles can be swapped for
/// fakes.
#[derive(Clone)]
pub struct NotificationManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("NotificationManager")
            .field("is_supported", &self.inner.is_supported)
            .field("is_enabled", &state.is_enabled)
            .field("current_token", &state.current_token)
            .field("messaging_ready", &state.messaging_ready)
            .finish()
    }
}

impl NotificationManager {
    pub fn new(
        config: ManagerConfig,
        runtime: Arc<dyn PushRuntime>,
        sdk: Arc<dyn MessagingSdk>,
        service: Arc<dyn RegistrationService>,
        surface: Arc<dyn NotificationSurface>,
    ) -> Self {
        let is_supported = check_support(runtime.as_ref());
        Self {
            inner: Arc::new(ManagerInner {
                config,
                runtime,
                sdk,
                service,
                surface,
                is_supported,
                state: Mutex::new(ManagerState::default()),
                flow_lock: Arc::new(tokio::sync::Mutex::new(())),
                live_gate: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Cached result of capability detection
    pub fn is_supported(&self) -> bool {
        self.inner.is_supported
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().is_enabled
    }

    pub fn current_token(&self) -> Option<DeviceToken> {
        self.inner.state.lock().current_token.clone()
    }

    pub fn worker_registration(&self) -> Option<Arc<dyn WorkerRegistration>> {
        self.inner.state.lock().worker.clone()
    }

    /// Snapshot of the most recent enable attempt
    pub fn last_enable(&self) -> Option<EnableLifecycle> {
        let lifecycle = self.inner.state.lock().last_enable.clone();
        lifecycle.map(|l| l.lock().clone())
    }

    /// Fetch remote config, initialize the SDK once, register the worker and
    /// subscribe the foreground handler. Safe to call repeatedly.
    pub async fn init(&self) -> PushResult<()> {
        self.inner.init(&CancellationToken::new()).await
    }

    /// Permission gate. Never prompts when permission is already denied.
    pub async fn request_permission(&self) -> PushResult<()> {
        self.inner.request_permission(&CancellationToken::new()).await
    }

    pub async fn get_token(&self) -> PushResult<DeviceToken> {
        self.inner.get_token(&CancellationToken::new()).await
    }

    /// Register `token`, or the cached token when `None`. Without either no
    /// request is made.
    pub async fn register_token(&self, token: Option<DeviceToken>) -> PushResult<RegisterReceipt> {
        self.inner
            .register_token(token, &CancellationToken::new())
            .await
    }

    pub async fn unregister_token(&self) -> PushResult<()> {
        self.inner.unregister_token().await
    }

    pub async fn update_preferences(
        &self,
        update: PreferenceUpdate,
    ) -> PushResult<PreferenceUpdateReceipt> {
        self.inner.update_preferences(update).await
    }

    pub async fn preferences(&self) -> PushResult<Preferences> {
        self.inner
            .service
            .preferences()
            .await
            .inspect_err(|e| log_failure("get_preferences", e))
    }

    pub async fn status(&self) -> PushResult<StatusReport> {
        self.inner
            .service
            .status()
            .await
            .inspect_err(|e| log_failure("get_status", e))
    }

    /// Display path for a message received while the page is focused. The
    /// toast is always shown; native display failures degrade silently.
    pub async fn handle_foreground_message(&self, message: PushMessage) {
        self.inner.handle_foreground(message).await;
    }

    /// Delete the SDK token, drop the worker, re-initialize and register a
    /// fresh token.
    ///
    /// Resolves to `Ok(true)` only when a new token was obtained and
    /// registered. A failed re-initialization is returned as `Err`; every
    /// other step failure is logged and tolerated.
    pub async fn hard_reset(&self) -> PushResult<bool> {
        let Ok(_guard) = self.inner.flow_lock.clone().try_lock_owned() else {
            tracing::warn!("hard reset rejected, another flow is running");
            return Err(PushError::Busy);
        };
        self.inner.hard_reset().await
    }

    /// Full user-facing flow: confirm, init, permission, token, register,
    /// preferences. The chain after confirmation is bounded by
    /// `ManagerConfig::enable_timeout`.
    pub async fn enable(&self) -> EnableOutcome {
        let Ok(_guard) = self.inner.flow_lock.clone().try_lock_owned() else {
            tracing::warn!("enable rejected, another flow is running");
            return EnableOutcome::Busy;
        };
        let attempt = AttemptId::generate();
        let span = tracing::info_span!("enable", attempt = %attempt);
        self.inner.clone().enable(attempt).instrument(span).await
    }

    /// Set the remote preference to disabled, then unregister the token. Both
    /// steps run even if the first fails; local state is cleared regardless.
    /// Returns the first failure, if any.
    pub async fn disable(&self) -> PushResult<()> {
        let Ok(_guard) = self.inner.flow_lock.clone().try_lock_owned() else {
            tracing::warn!("disable rejected, another flow is running");
            return Err(PushError::Busy);
        };

        let preferences = self
            .inner
            .update_preferences(PreferenceUpdate::enabled(false))
            .await;
        let unregistered = self.inner.unregister_token().await;
        self.inner.state.lock().is_enabled = false;
        tracing::info!("notifications disabled locally");

        preferences.and(unregistered)
    }

    /// Show a local verification notification, then ask the backend to push a
    /// test message to this device.
    pub async fn send_test(&self) -> PushResult<()> {
        let Ok(_guard) = self.inner.flow_lock.clone().try_lock_owned() else {
            return Err(PushError::Busy);
        };
        self.inner.send_test().await
    }
}

/// Capability detection: all three runtime APIs must be present.
fn check_support(runtime: &dyn PushRuntime) -> bool {
    let capabilities = runtime.capabilities();
    let supported = capabilities.supports_push();
    if !supported {
        tracing::info!(missing = ?capabilities.missing(), "runtime does not support push notifications");
    }
    supported
}

fn ensure_live(cancel: &CancellationToken) -> PushResult<()> {
    if cancel.is_cancelled() {
        Err(PushError::Cancelled)
    } else {
        Ok(())
    }
}

fn log_failure(operation: &'static str, error: &PushError) {
    if error.is_expected() {
        tracing::info!(operation, error = %error, "notification operation did not complete");
    } else {
        tracing::error!(operation, error = %error, "notification operation failed");
    }
}

impl ManagerInner {
    fn toast(&self, kind: ToastKind) {
        self.surface.show_toast(kind.to_toast());
    }

    /// Run `effect` unless `cancel` has fired. Errors with `Cancelled`
    /// otherwise.
    fn if_live<R>(&self, cancel: &CancellationToken, effect: impl FnOnce() -> R) -> PushResult<R> {
        let _gate = self.live_gate.lock();
        ensure_live(cancel)?;
        Ok(effect())
    }

    async fn init(self: &Arc<Self>, cancel: &CancellationToken) -> PushResult<()> {
        tracing::debug!("initializing notification manager");
        if !self.is_supported {
            return Err(PushError::Unsupported);
        }
        ensure_live(cancel)?;

        let remote = self
            .service
            .remote_config()
            .await
            .inspect_err(|e| log_failure("fetch_config", e))?;
        let sdk_config = remote
            .sdk_config()
            .inspect_err(|e| log_failure("fetch_config", e))?;
        ensure_live(cancel)?;

        if self.sdk.is_initialized() {
            tracing::debug!("messaging SDK already initialized, reusing instance");
        } else {
            self.sdk
                .initialize(sdk_config)
                .inspect_err(|e| log_failure("sdk_initialize", e))?;
            tracing::info!(project = ?sdk_config.project_id, "messaging SDK initialized");
        }
        self.state.lock().messaging_ready = true;

        let script_url = self
            .config
            .cache_busted_worker_url(Utc::now().timestamp_millis());
        let registration = self
            .runtime
            .register_worker(script_url.clone(), self.config.worker_scope.clone())
            .await
            .inspect_err(|e| log_failure("register_worker", e))?;
        tracing::info!(script = %script_url, state = ?registration.state(), "worker registered");
        self.if_live(cancel, || self.state.lock().worker = Some(registration))?;

        self.subscribe_foreground();
        Ok(())
    }

    fn subscribe_foreground(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.foreground_subscribed {
                return;
            }
            state.foreground_subscribed = true;
        }

        // Weak so the SDK holding the handler does not keep the manager alive
        let weak: Weak<ManagerInner> = Arc::downgrade(self);
        let handler: ForegroundHandler = Arc::new(move |message: PushMessage| -> BoxFuture<'static, ()> {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_foreground(message).await;
                }
            })
        });
        self.sdk.on_foreground_message(handler);
        tracing::debug!("foreground message handler subscribed");
    }

    async fn request_permission(&self, cancel: &CancellationToken) -> PushResult<()> {
        if !self.is_supported {
            self.toast(ToastKind::NotSupported);
            return Err(PushError::Unsupported);
        }

        match self.runtime.permission() {
            PermissionState::Granted => {
                tracing::debug!("notification permission already granted");
                Ok(())
            },
            PermissionState::Denied => {
                tracing::info!("notification permission blocked, not prompting");
                self.if_live(cancel, || {
                    self.surface.close_modal();
                    self.toast(ToastKind::Blocked);
                })?;
                Err(PushError::PermissionDenied)
            },
            PermissionState::Default => {
                ensure_live(cancel)?;
                let answer = self.runtime.request_permission().await;
                // a prompt answered after the flow was abandoned changes nothing
                ensure_live(cancel)?;
                match answer {
                    Ok(PermissionState::Granted) => {
                        tracing::info!("notification permission granted");
                        Ok(())
                    },
                    Ok(status) => {
                        tracing::info!(status = ?status, "notification permission not granted");
                        self.if_live(cancel, || {
                            self.surface.close_modal();
                            self.toast(ToastKind::PermissionDismissed);
                        })?;
                        Err(PushError::PermissionDismissed)
                    },
                    Err(e) => {
                        log_failure("request_permission", &e);
                        self.if_live(cancel, || self.surface.close_modal())?;
                        Err(e)
                    },
                }
            },
        }
    }

    /// Cached registration, else an existing one for the scope, else a fresh
    /// registration.
    async fn resolve_worker(&self) -> PushResult<Arc<dyn WorkerRegistration>> {
        let cached = self.state.lock().worker.clone();
        if let Some(registration) = cached {
            return Ok(registration);
        }

        let scope = self.config.worker_scope.clone();
        let registration = match self.runtime.registration(scope.clone()).await? {
            Some(existing) => existing,
            None => {
                tracing::info!("no worker registration found, registering");
                let script_url = self
                    .config
                    .cache_busted_worker_url(Utc::now().timestamp_millis());
                self.runtime.register_worker(script_url, scope).await?
            },
        };
        self.state.lock().worker = Some(registration.clone());
        Ok(registration)
    }

    async fn get_token(self: &Arc<Self>, cancel: &CancellationToken) -> PushResult<DeviceToken> {
        let messaging_ready = self.state.lock().messaging_ready;
        if !messaging_ready {
            tracing::debug!("messaging not initialized, running init before token request");
            self.init(cancel).await?;
        }

        let remote = self
            .service
            .remote_config()
            .await
            .inspect_err(|e| log_failure("fetch_config", e))?;
        let vapid_key = remote
            .vapid_key()
            .inspect_err(|e| log_failure("vapid_key", e))?;
        ensure_live(cancel)?;

        let registration = self
            .resolve_worker()
            .await
            .inspect_err(|e| log_failure("resolve_worker", e))?;
        let worker = ActiveWorker::await_activation(registration)
            .await
            .inspect_err(|e| log_failure("await_activation", e))?;
        ensure_live(cancel)?;

        tracing::debug!("requesting device token");
        match self.sdk.get_token(&vapid_key, &worker).await {
            Ok(Some(token)) => {
                self.if_live(cancel, || {
                    self.state.lock().current_token = Some(token.clone());
                })?;
                tracing::info!(token = %token.redacted(), "device token obtained");
                Ok(token)
            },
            Ok(None) => {
                tracing::warn!("messaging SDK returned no token");
                Err(PushError::NoToken)
            },
            Err(e) => {
                log_failure("get_token", &e);
                let (code, message) = match &e {
                    PushError::Sdk { code, message } => (code.clone(), message.clone()),
                    other => ("unknown".to_string(), other.to_string()),
                };
                self.if_live(cancel, || self.toast(ToastKind::TokenError { code, message }))?;
                Err(e)
            },
        }
    }

    async fn register_token(
        &self,
        token: Option<DeviceToken>,
        cancel: &CancellationToken,
    ) -> PushResult<RegisterReceipt> {
        let cached = self.state.lock().current_token.clone();
        let Some(token) = token.or(cached) else {
            tracing::info!("no token to register");
            return Err(PushError::NoToken);
        };
        ensure_live(cancel)?;

        let device = self.runtime.device_info();
        let receipt = self
            .service
            .register(token.clone(), device)
            .await
            .inspect_err(|e| log_failure("register_token", e))?;

        self.if_live(cancel, || {
            let mut state = self.state.lock();
            state.is_enabled = true;
            if state.current_token.is_none() {
                state.current_token = Some(token.clone());
            }
        })?;
        tracing::info!(
            token = %token.redacted(),
            scheduled_meals = ?receipt.scheduled_meals,
            "device token registered"
        );
        Ok(receipt)
    }

    async fn unregister_token(&self) -> PushResult<()> {
        let cached = self.state.lock().current_token.clone();
        let Some(token) = cached else {
            tracing::debug!("no cached token, nothing to unregister");
            return Ok(());
        };

        self.service
            .unregister(token.clone())
            .await
            .inspect_err(|e| log_failure("unregister_token", e))?;

        {
            let mut state = self.state.lock();
            if state.current_token.as_ref() == Some(&token) {
                state.current_token = None;
            }
            state.is_enabled = false;
        }
        tracing::info!(token = %token.redacted(), "device token unregistered");
        self.toast(ToastKind::Disabled);
        Ok(())
    }

    async fn update_preferences(
        &self,
        update: PreferenceUpdate,
    ) -> PushResult<PreferenceUpdateReceipt> {
        self.service
            .update_preferences(update)
            .await
            .inspect_err(|e| log_failure("update_preferences", e))
    }

    async fn handle_foreground(&self, message: PushMessage) {
        let notification = NativeNotification::foreground(&self.config, &message, Utc::now());
        tracing::info!(tag = %notification.tag, "foreground message received");

        self.toast(ToastKind::Foreground {
            title: notification.title.clone(),
            body: notification.body.clone(),
        });

        let cached = self.state.lock().worker.clone();
        let registration = match cached {
            Some(registration) => Some(registration),
            None => match self.runtime.registration(self.config.worker_scope.clone()).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(error = %e, "worker registration lookup failed");
                    None
                },
            },
        };

        match registration {
            Some(registration) => match registration.show_notification(notification.clone()).await {
                Ok(()) => tracing::debug!("foreground notification displayed via worker"),
                Err(e) => {
                    tracing::warn!(error = %e, "worker display failed, falling back to page");
                    self.show_page_notification(&notification);
                },
            },
            None => self.show_page_notification(&notification),
        }
    }

    fn show_page_notification(&self, notification: &NativeNotification) {
        match self.runtime.show_page_notification(notification) {
            Ok(()) => tracing::debug!("notification displayed via page constructor"),
            Err(e) => tracing::warn!(error = %e, "page notification failed, toast only"),
        }
    }

    async fn hard_reset(self: &Arc<Self>) -> PushResult<bool> {
        tracing::info!("performing hard reset");
        let live = CancellationToken::new();

        if self.sdk.is_initialized() {
            match self.sdk.delete_token().await {
                Ok(deleted) => tracing::info!(deleted, "device token deleted"),
                Err(e) => tracing::warn!(error = %e, "token delete failed, it may already be gone"),
            }
        }

        let registration = {
            let mut state = self.state.lock();
            state.current_token = None;
            state.worker.take()
        };
        let registration = match registration {
            Some(registration) => Some(registration),
            None => match self.runtime.registration(self.config.worker_scope.clone()).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(error = %e, "worker registration lookup failed");
                    None
                },
            },
        };
        if let Some(registration) = registration {
            match registration.unregister().await {
                Ok(removed) => tracing::info!(removed, "worker unregistered"),
                Err(e) => tracing::warn!(error = %e, "worker unregister failed"),
            }
        }

        if let Err(e) = self.init(&live).await {
            tracing::error!(error = %e, "hard reset failed, re-initialization did not complete");
            return Err(e);
        }

        let token = match self.get_token(&live).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "hard reset could not obtain a new token");
                return Ok(false);
            },
        };

        match self.register_token(Some(token), &live).await {
            Ok(_) => {
                tracing::info!("hard reset complete");
                Ok(true)
            },
            Err(e) => {
                tracing::warn!(error = %e, "hard reset could not register the new token");
                Ok(false)
            },
        }
    }

    async fn send_test(self: &Arc<Self>) -> PushResult<()> {
        if !self.is_supported {
            self.toast(ToastKind::NotSupported);
            return Err(PushError::Unsupported);
        }

        match self.runtime.permission() {
            PermissionState::Granted => {},
            other => {
                self.toast(ToastKind::PermissionIssue);
                return Err(if other == PermissionState::Denied {
                    PushError::PermissionDenied
                } else {
                    PushError::PermissionDismissed
                });
            },
        }

        let local = NativeNotification::local_verification(&self.config, Utc::now());
        let cached = self.state.lock().worker.clone();
        match cached {
            Some(registration) => {
                if let Err(e) = registration.show_notification(local.clone()).await {
                    tracing::warn!(error = %e, "local verification via worker failed");
                    self.show_page_notification(&local);
                }
            },
            None => self.show_page_notification(&local),
        }

        let cached = self.state.lock().current_token.clone();
        let token = match cached {
            Some(token) => Some(token),
            None => self.get_token(&CancellationToken::new()).await.ok(),
        };

        match self.service.send_test(token).await {
            Ok(()) => {
                tracing::info!("test notification requested");
                self.toast(ToastKind::TestSent);
                Ok(())
            },
            Err(e) => {
                log_failure("send_test", &e);
                let message = match &e {
                    PushError::Server { message, .. } | PushError::Rejected(message) => {
                        message.clone()
                    },
                    other => other.to_string(),
                };
                self.toast(ToastKind::TestFailed(message));
                Err(e)
            },
        }
    }

    async fn enable(self: Arc<Self>, attempt: AttemptId) -> EnableOutcome {
        let lifecycle = Arc::new(Mutex::new(EnableLifecycle::new(attempt)));
        self.state.lock().last_enable = Some(lifecycle.clone());

        // Nothing else drives this lifecycle until the chain is spawned, so
        // the moves out of Prompt below cannot be rejected.
        if !self.is_supported {
            let _ = lifecycle
                .lock()
                .transition_to(EnableStage::Failed(EnableFailure::Unsupported));
            self.toast(ToastKind::NotSupported);
            return EnableOutcome::Failed {
                stage: EnableStage::Prompt,
                failure: EnableFailure::Unsupported,
                error: PushError::Unsupported,
            };
        }

        if !self.surface.confirm_enable().await {
            let _ = lifecycle.lock().transition_to(EnableStage::Declined);
            tracing::info!("user declined notifications");
            return EnableOutcome::Declined;
        }

        let timeout = self.config.enable_timeout();
        let cancel = CancellationToken::new();
        let mut chain = tokio::spawn({
            let inner = self.clone();
            let lifecycle = lifecycle.clone();
            let cancel = cancel.clone();
            async move { inner.run_enable_chain(&lifecycle, &cancel).await }
                .instrument(tracing::Span::current())
        });

        tokio::select! {
            biased;
            joined = &mut chain => self.chain_result(&lifecycle, joined),
            _ = tokio::time::sleep(timeout) => {
                let (stage, timed_out) = {
                    let _gate = self.live_gate.lock();
                    let mut lifecycle = lifecycle.lock();
                    let stage = lifecycle.stage;
                    let timed_out = lifecycle.transition_to(EnableStage::TimedOut).is_ok();
                    if timed_out {
                        cancel.cancel();
                    }
                    (stage, timed_out)
                };

                if !timed_out {
                    // the chain reached a terminal stage as the timer fired
                    tracing::debug!(stage = ?stage, "enable settled at the deadline");
                    let joined = chain.await;
                    return self.chain_result(&lifecycle, joined);
                }

                // The chain task keeps running detached; it sees the cancelled
                // token or the terminal stage and stops before its next step.
                tracing::warn!(stage = ?stage, timeout = ?timeout, "enable timed out");
                self.surface.close_modal();
                self.toast(ToastKind::Timeout);
                EnableOutcome::TimedOut(timeout)
            },
        }
    }

    fn chain_result(
        &self,
        lifecycle: &Mutex<EnableLifecycle>,
        joined: Result<EnableOutcome, tokio::task::JoinError>,
    ) -> EnableOutcome {
        let error = match joined {
            Ok(outcome) => return outcome,
            Err(e) => e,
        };
        tracing::error!(error = %error, "enable chain ended without a result");
        let (stage, recorded) = {
            let _gate = self.live_gate.lock();
            let mut lifecycle = lifecycle.lock();
            let stage = lifecycle.stage;
            let recorded = lifecycle
                .transition_to(EnableStage::Failed(EnableFailure::Interrupted))
                .is_ok();
            (stage, recorded)
        };
        if recorded {
            self.surface.close_modal();
            self.toast(ToastKind::Failed("Failed to enable notifications".to_string()));
        }
        EnableOutcome::Failed {
            stage,
            failure: EnableFailure::Interrupted,
            error: PushError::Cancelled,
        }
    }

    fn advance(&self, lifecycle: &Mutex<EnableLifecycle>, stage: EnableStage) -> PushResult<()> {
        let _gate = self.live_gate.lock();
        lifecycle.lock().transition_to(stage)?;
        self.surface.show_progress(stage);
        tracing::debug!(stage = ?stage, label = stage.progress_label(), "enable stage");
        Ok(())
    }

    /// Terminal failure for the current stage. When the lifecycle is already
    /// terminal (timed out) nothing is shown.
    fn fail(
        &self,
        lifecycle: &Mutex<EnableLifecycle>,
        failure: EnableFailure,
        error: PushError,
        toast: Option<ToastKind>,
    ) -> EnableOutcome {
        let _gate = self.live_gate.lock();
        let transition = {
            let mut lifecycle = lifecycle.lock();
            let stage = lifecycle.stage;
            lifecycle
                .transition_to(EnableStage::Failed(failure))
                .map(|()| stage)
        };
        let Ok(stage) = transition else {
            return abandoned(lifecycle);
        };
        log_failure("enable", &error);
        self.surface.close_modal();
        if let Some(kind) = toast {
            self.toast(kind);
        }
        EnableOutcome::Failed {
            stage,
            failure,
            error,
        }
    }

    async fn run_enable_chain(
        self: &Arc<Self>,
        lifecycle: &Mutex<EnableLifecycle>,
        cancel: &CancellationToken,
    ) -> EnableOutcome {
        if self.advance(lifecycle, EnableStage::Init).is_err() {
            return abandoned(lifecycle);
        }
        if let Err(e) = self.init(cancel).await {
            if cancel.is_cancelled() {
                return abandoned(lifecycle);
            }
            return self.fail(lifecycle, EnableFailure::SetupNeeded, e, Some(ToastKind::SetupNeeded));
        }

        if self.advance(lifecycle, EnableStage::PermissionRequest).is_err() {
            return abandoned(lifecycle);
        }
        if let Err(e) = self.request_permission(cancel).await {
            if cancel.is_cancelled() {
                return abandoned(lifecycle);
            }
            // request_permission already closed the modal and told the user
            let failure = match e {
                PushError::PermissionDenied => EnableFailure::PermissionBlocked,
                PushError::Unsupported => EnableFailure::Unsupported,
                _ => EnableFailure::PermissionDismissed,
            };
            return self.fail(lifecycle, failure, e, None);
        }

        if self.advance(lifecycle, EnableStage::TokenAcquire).is_err() {
            return abandoned(lifecycle);
        }
        let token = match self.get_token(cancel).await {
            Ok(token) => token,
            Err(e) => {
                if cancel.is_cancelled() {
                    return abandoned(lifecycle);
                }
                // SDK failures were already shown with their code
                let toast = (!matches!(e, PushError::Sdk { .. })).then(|| {
                    ToastKind::Failed("Could not get notification token".to_string())
                });
                return self.fail(lifecycle, EnableFailure::TokenError, e, toast);
            },
        };

        if self.advance(lifecycle, EnableStage::Register).is_err() {
            return abandoned(lifecycle);
        }
        let receipt = match self.register_token(Some(token.clone()), cancel).await {
            Ok(receipt) => receipt,
            Err(e) => {
                if cancel.is_cancelled() {
                    return abandoned(lifecycle);
                }
                return self.fail(
                    lifecycle,
                    EnableFailure::RegistrationError,
                    e,
                    Some(ToastKind::RegistrationError),
                );
            },
        };

        if self.advance(lifecycle, EnableStage::PreferenceUpdate).is_err() {
            return abandoned(lifecycle);
        }
        if let Err(e) = self.update_preferences(PreferenceUpdate::enabled(true)).await {
            tracing::warn!(error = %e, "token registered but preference update failed");
        }

        if self.advance(lifecycle, EnableStage::Success).is_err() {
            return abandoned(lifecycle);
        }
        let scheduled_meals = receipt.scheduled_meals.unwrap_or(0);
        self.surface.show_enabled(scheduled_meals);
        tracing::info!(scheduled_meals, "notifications enabled");
        EnableOutcome::Enabled {
            token,
            scheduled_meals,
        }
    }
}

/// Outcome reported by a chain that lost the timeout race. Nobody awaits it.
fn abandoned(lifecycle: &Mutex<EnableLifecycle>) -> EnableOutcome {
    let elapsed = lifecycle.lock().elapsed();
    tracing::debug!(elapsed = ?elapsed, "abandoned enable chain stopped");
    EnableOutcome::TimedOut(elapsed)
}

//! In-memory collaborators for driving `NotificationManager` in tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use dietnotify_push::*;
use parking_lot::Mutex;
use tokio::sync::watch;

pub const TEST_VAPID_KEY: &str = "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA_0QTpQtUbVlUls0VJXg7A8u";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn configured_remote() -> RemoteConfig {
    RemoteConfig {
        config: Some(SdkConfig {
            api_key: Some("AIzaSyD-test-key".to_string()),
            auth_domain: Some("dietnotify-test.firebaseapp.com".to_string()),
            project_id: Some("dietnotify-test".to_string()),
            storage_bucket: None,
            messaging_sender_id: Some("1234567890".to_string()),
            app_id: Some("1:1234567890:web:abcdef".to_string()),
        }),
        vapid_key: Some(TEST_VAPID_KEY.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Worker

pub struct FakeWorker {
    scope: String,
    state_tx: watch::Sender<WorkerState>,
    state_rx: watch::Receiver<WorkerState>,
    pub shown: Mutex<Vec<NativeNotification>>,
    pub show_fails: AtomicBool,
    pub unregistered: AtomicBool,
}

impl FakeWorker {
    pub fn new(scope: &str, state: WorkerState) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(state);
        Arc::new(Self {
            scope: scope.to_string(),
            state_tx,
            state_rx,
            shown: Mutex::new(Vec::new()),
            show_fails: AtomicBool::new(false),
            unregistered: AtomicBool::new(false),
        })
    }

    pub fn set_state(&self, state: WorkerState) {
        self.state_tx.send_replace(state);
    }

    pub fn shown_count(&self) -> usize {
        self.shown.lock().len()
    }
}

impl WorkerRegistration for FakeWorker {
    fn scope(&self) -> String {
        self.scope.clone()
    }

    fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    fn activated(&self) -> BoxFuture<'_, PushResult<()>> {
        let mut rx = self.state_rx.clone();
        Box::pin(async move {
            rx.wait_for(|state| !state.is_pending())
                .await
                .map(|_| ())
                .map_err(|e| PushError::Worker(e.to_string()))
        })
    }

    fn show_notification(&self, notification: NativeNotification) -> BoxFuture<'_, PushResult<()>> {
        Box::pin(async move {
            if self.show_fails.load(Ordering::SeqCst) {
                return Err(PushError::Worker("showNotification rejected".to_string()));
            }
            self.shown.lock().push(notification);
            Ok(())
        })
    }

    fn unregister(&self) -> BoxFuture<'_, PushResult<bool>> {
        Box::pin(async move { Ok(!self.unregistered.swap(true, Ordering::SeqCst)) })
    }
}

// ---------------------------------------------------------------------------
// Runtime

pub struct FakeRuntime {
    pub capabilities: Mutex<RuntimeCapabilities>,
    pub permission: Mutex<PermissionState>,
    /// What the permission prompt resolves to
    pub prompt_answer: Mutex<PermissionState>,
    pub prompt_calls: AtomicUsize,
    /// How long the user takes to answer the prompt
    pub prompt_delay: Mutex<Option<Duration>>,
    /// State newly registered workers start in
    pub new_worker_state: Mutex<WorkerState>,
    pub workers: Mutex<Vec<Arc<FakeWorker>>>,
    pub registered_urls: Mutex<Vec<String>>,
    pub lookup_calls: AtomicUsize,
    pub page_notifications: Mutex<Vec<NativeNotification>>,
    pub page_fails: AtomicBool,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            capabilities: Mutex::new(RuntimeCapabilities::full()),
            permission: Mutex::new(PermissionState::Granted),
            prompt_answer: Mutex::new(PermissionState::Granted),
            prompt_calls: AtomicUsize::new(0),
            prompt_delay: Mutex::new(None),
            new_worker_state: Mutex::new(WorkerState::Active),
            workers: Mutex::new(Vec::new()),
            registered_urls: Mutex::new(Vec::new()),
            lookup_calls: AtomicUsize::new(0),
            page_notifications: Mutex::new(Vec::new()),
            page_fails: AtomicBool::new(false),
        }
    }
}

impl FakeRuntime {
    pub fn latest_worker(&self) -> Option<Arc<FakeWorker>> {
        self.workers.lock().last().cloned()
    }

    pub fn register_count(&self) -> usize {
        self.registered_urls.lock().len()
    }
}

impl PushRuntime for FakeRuntime {
    fn capabilities(&self) -> RuntimeCapabilities {
        *self.capabilities.lock()
    }

    fn permission(&self) -> PermissionState {
        *self.permission.lock()
    }

    fn request_permission(&self) -> BoxFuture<'_, PushResult<PermissionState>> {
        Box::pin(async move {
            self.prompt_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.prompt_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let answer = *self.prompt_answer.lock();
            *self.permission.lock() = answer;
            Ok(answer)
        })
    }

    fn register_worker(
        &self,
        script_url: String,
        scope: String,
    ) -> BoxFuture<'_, PushResult<Arc<dyn WorkerRegistration>>> {
        Box::pin(async move {
            let state = *self.new_worker_state.lock();
            let worker = FakeWorker::new(&scope, state);
            self.registered_urls.lock().push(script_url);
            self.workers.lock().push(worker.clone());
            Ok(worker as Arc<dyn WorkerRegistration>)
        })
    }

    fn registration(
        &self,
        scope: String,
    ) -> BoxFuture<'_, PushResult<Option<Arc<dyn WorkerRegistration>>>> {
        Box::pin(async move {
            self.lookup_calls.fetch_add(1, Ordering::SeqCst);
            let found = self
                .workers
                .lock()
                .iter()
                .rev()
                .find(|w| w.scope == scope && !w.unregistered.load(Ordering::SeqCst))
                .cloned();
            Ok(found.map(|w| w as Arc<dyn WorkerRegistration>))
        })
    }

    fn show_page_notification(&self, notification: &NativeNotification) -> PushResult<()> {
        if self.page_fails.load(Ordering::SeqCst) {
            return Err(PushError::Worker("Illegal constructor".to_string()));
        }
        self.page_notifications.lock().push(notification.clone());
        Ok(())
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo::new("Mozilla/5.0 (X11; Linux x86_64) Test", "Linux x86_64")
    }
}

// ---------------------------------------------------------------------------
// Messaging SDK

pub struct FakeSdk {
    pub initialized: AtomicBool,
    pub init_calls: AtomicUsize,
    pub init_fails: AtomicBool,
    pub token_calls: AtomicUsize,
    /// Scripted answers; once drained, tokens are minted as `token-N`
    pub token_script: Mutex<VecDeque<PushResult<Option<DeviceToken>>>>,
    /// Worker state observed at each token request
    pub worker_states: Mutex<Vec<WorkerState>>,
    pub token_delay: Mutex<Option<Duration>>,
    pub delete_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    handler: Mutex<Option<ForegroundHandler>>,
}

impl Default for FakeSdk {
    fn default() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            init_calls: AtomicUsize::new(0),
            init_fails: AtomicBool::new(false),
            token_calls: AtomicUsize::new(0),
            token_script: Mutex::new(VecDeque::new()),
            worker_states: Mutex::new(Vec::new()),
            token_delay: Mutex::new(None),
            delete_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            handler: Mutex::new(None),
        }
    }
}

impl FakeSdk {
    pub fn script_token(&self, answer: PushResult<Option<DeviceToken>>) {
        self.token_script.lock().push_back(answer);
    }

    /// Deliver a message the way the SDK does while the page is focused
    pub async fn deliver(&self, message: PushMessage) -> bool {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(message).await;
                true
            },
            None => false,
        }
    }
}

impl MessagingSdk for FakeSdk {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn initialize(&self, config: &SdkConfig) -> PushResult<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.init_fails.load(Ordering::SeqCst) {
            return Err(PushError::sdk("app/invalid-api-key", "Invalid API key"));
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(PushError::sdk(
                "app/duplicate-app",
                format!("app for {:?} already exists", config.project_id),
            ));
        }
        Ok(())
    }

    fn get_token<'a>(
        &'a self,
        _vapid_key: &'a VapidKey,
        worker: &'a ActiveWorker,
    ) -> BoxFuture<'a, PushResult<Option<DeviceToken>>> {
        Box::pin(async move {
            let n = self.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.worker_states.lock().push(worker.registration().state());
            let delay = *self.token_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.token_script.lock().pop_front();
            scripted.unwrap_or_else(|| Ok(Some(DeviceToken::new(format!("token-{n}")))))
        })
    }

    fn delete_token(&self) -> BoxFuture<'_, PushResult<bool>> {
        Box::pin(async move {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
    }

    fn on_foreground_message(&self, handler: ForegroundHandler) {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        *self.handler.lock() = Some(handler);
    }
}

// ---------------------------------------------------------------------------
// Registration service

pub struct FakeService {
    pub remote: Mutex<RemoteConfig>,
    pub config_calls: AtomicUsize,
    pub registered: Mutex<Vec<DeviceToken>>,
    pub unregistered: Mutex<Vec<DeviceToken>>,
    pub preference_updates: Mutex<Vec<PreferenceUpdate>>,
    pub test_requests: Mutex<Vec<Option<DeviceToken>>>,
    pub register_error: Mutex<Option<PushError>>,
    pub unregister_error: Mutex<Option<PushError>>,
    pub preferences_error: Mutex<Option<PushError>>,
    pub test_error: Mutex<Option<PushError>>,
    pub scheduled_meals: Mutex<Option<u32>>,
}

impl Default for FakeService {
    fn default() -> Self {
        Self {
            remote: Mutex::new(configured_remote()),
            config_calls: AtomicUsize::new(0),
            registered: Mutex::new(Vec::new()),
            unregistered: Mutex::new(Vec::new()),
            preference_updates: Mutex::new(Vec::new()),
            test_requests: Mutex::new(Vec::new()),
            register_error: Mutex::new(None),
            unregister_error: Mutex::new(None),
            preferences_error: Mutex::new(None),
            test_error: Mutex::new(None),
            scheduled_meals: Mutex::new(Some(3)),
        }
    }
}

impl FakeService {
    /// Requests other than the config fetch
    pub fn write_calls(&self) -> usize {
        self.registered.lock().len()
            + self.unregistered.lock().len()
            + self.preference_updates.lock().len()
            + self.test_requests.lock().len()
    }
}

impl RegistrationService for FakeService {
    fn remote_config(&self) -> BoxFuture<'_, PushResult<RemoteConfig>> {
        Box::pin(async move {
            self.config_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.remote.lock().clone())
        })
    }

    fn register(
        &self,
        token: DeviceToken,
        _device: DeviceInfo,
    ) -> BoxFuture<'_, PushResult<RegisterReceipt>> {
        Box::pin(async move {
            self.registered.lock().push(token);
            if let Some(e) = self.register_error.lock().clone() {
                return Err(e);
            }
            Ok(RegisterReceipt {
                message: Some("Device registered".to_string()),
                scheduled_meals: *self.scheduled_meals.lock(),
            })
        })
    }

    fn unregister(&self, token: DeviceToken) -> BoxFuture<'_, PushResult<()>> {
        Box::pin(async move {
            self.unregistered.lock().push(token);
            match self.unregister_error.lock().clone() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    fn preferences(&self) -> BoxFuture<'_, PushResult<Preferences>> {
        Box::pin(async move { Ok(Preferences::default()) })
    }

    fn update_preferences(
        &self,
        update: PreferenceUpdate,
    ) -> BoxFuture<'_, PushResult<PreferenceUpdateReceipt>> {
        Box::pin(async move {
            self.preference_updates.lock().push(update);
            if let Some(e) = self.preferences_error.lock().clone() {
                return Err(e);
            }
            Ok(PreferenceUpdateReceipt::default())
        })
    }

    fn status(&self) -> BoxFuture<'_, PushResult<StatusReport>> {
        Box::pin(async move {
            Ok(StatusReport {
                registered_devices: self.registered.lock().len() as u32,
                ..Default::default()
            })
        })
    }

    fn send_test(&self, token: Option<DeviceToken>) -> BoxFuture<'_, PushResult<()>> {
        Box::pin(async move {
            self.test_requests.lock().push(token);
            match self.test_error.lock().clone() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// UI surface

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModalEvent {
    Confirm,
    Progress(EnableStage),
    Enabled(u32),
    Closed,
}

pub struct FakeSurface {
    pub accept: AtomicBool,
    /// Keep the confirmation modal open for this long before answering
    pub confirm_delay: Mutex<Option<Duration>>,
    /// Blocks the calling thread inside `show_enabled`
    pub enabled_stall: Mutex<Option<Duration>>,
    pub toasts: Mutex<Vec<Toast>>,
    pub modal: Mutex<Vec<ModalEvent>>,
}

impl Default for FakeSurface {
    fn default() -> Self {
        Self {
            accept: AtomicBool::new(true),
            confirm_delay: Mutex::new(None),
            enabled_stall: Mutex::new(None),
            toasts: Mutex::new(Vec::new()),
            modal: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSurface {
    pub fn toast_titles(&self) -> Vec<String> {
        self.toasts.lock().iter().map(|t| t.title.clone()).collect()
    }

    pub fn has_toast(&self, title_fragment: &str) -> bool {
        self.toasts
            .lock()
            .iter()
            .any(|t| t.title.contains(title_fragment))
    }

    pub fn modal_events(&self) -> Vec<ModalEvent> {
        self.modal.lock().clone()
    }
}

impl NotificationSurface for FakeSurface {
    fn show_toast(&self, toast: Toast) {
        self.toasts.lock().push(toast);
    }

    fn confirm_enable(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.modal.lock().push(ModalEvent::Confirm);
            let delay = *self.confirm_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.accept.load(Ordering::SeqCst)
        })
    }

    fn show_progress(&self, stage: EnableStage) {
        self.modal.lock().push(ModalEvent::Progress(stage));
    }

    fn show_enabled(&self, scheduled_meals: u32) {
        let stall = *self.enabled_stall.lock();
        if let Some(stall) = stall {
            std::thread::sleep(stall);
        }
        self.modal.lock().push(ModalEvent::Enabled(scheduled_meals));
    }

    fn close_modal(&self) {
        self.modal.lock().push(ModalEvent::Closed);
    }
}

// ---------------------------------------------------------------------------
// Harness

pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub sdk: Arc<FakeSdk>,
    pub service: Arc<FakeService>,
    pub surface: Arc<FakeSurface>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        Self {
            runtime: Arc::new(FakeRuntime::default()),
            sdk: Arc::new(FakeSdk::default()),
            service: Arc::new(FakeService::default()),
            surface: Arc::new(FakeSurface::default()),
        }
    }

    /// Build a manager over the fakes. Capability detection happens here, so
    /// adjust `runtime.capabilities` first.
    pub fn manager(&self) -> NotificationManager {
        self.manager_with(ManagerConfig::default())
    }

    pub fn manager_with(&self, config: ManagerConfig) -> NotificationManager {
        NotificationManager::new(
            config,
            self.runtime.clone(),
            self.sdk.clone(),
            self.service.clone(),
            self.surface.clone(),
        )
    }

    pub fn with_permission(self, permission: PermissionState) -> Self {
        *self.runtime.permission.lock() = permission;
        self
    }

    pub fn unsupported(self) -> Self {
        *self.runtime.capabilities.lock() = RuntimeCapabilities {
            push_manager_api: false,
            ..RuntimeCapabilities::full()
        };
        self
    }
}

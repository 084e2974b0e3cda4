// User-visible content: toast messages, the native notification payload built
// for foreground messages, incoming push messages, and the UI surface seam

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BoxFuture;
use super::config::ManagerConfig;
use super::lifecycle::EnableStage;

/// Emoji prefix the scheduler puts on meal reminder titles
const MEAL_PREFIX: &str = "🍽️ ";

/// In-page toast. Text is sanitized on construction since it routinely embeds
/// server and SDK strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub title: String,
    pub message: String,
}

impl Toast {
    pub fn new(title: impl AsRef<str>, message: impl AsRef<str>) -> Self {
        Self {
            title: strip_markup(title.as_ref()),
            message: strip_markup(message.as_ref()),
        }
    }
}

/// Drop every tag and attribute, keeping only escaped text
fn strip_markup(text: &str) -> String {
    ammonia::Builder::empty().clean(text).to_string()
}

/// Catalogue of every message the manager shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastKind {
    NotSupported,
    /// Permission denied earlier; only browser settings can undo it
    Blocked,
    PermissionDismissed,
    SetupNeeded,
    TokenError { code: String, message: String },
    RegistrationError,
    Timeout,
    Failed(String),
    Disabled,
    PermissionIssue,
    TestSent,
    TestFailed(String),
    Foreground { title: String, body: String },
}

impl ToastKind {
    pub fn to_toast(&self) -> Toast {
        match self {
            ToastKind::NotSupported => Toast::new(
                "❌ Not Supported",
                "Push notifications are not supported in your browser",
            ),
            ToastKind::Blocked => Toast::new(
                "🔕 Blocked",
                "Notifications are blocked. Enable in browser settings.",
            ),
            ToastKind::PermissionDismissed => Toast::new(
                "🔕 Not Enabled",
                "Notification permission was not granted",
            ),
            ToastKind::SetupNeeded => Toast::new(
                "⚠️ Setup Needed",
                "Push messaging is not configured. Check admin settings.",
            ),
            ToastKind::TokenError { code, message } => {
                Toast::new(format!("❌ Token Error ({code})"), message)
            },
            ToastKind::RegistrationError => {
                Toast::new("❌ Error", "Could not register for notifications")
            },
            ToastKind::Timeout => Toast::new(
                "⏱️ Timeout",
                "Notification setup took too long. Check browser console for errors.",
            ),
            ToastKind::Failed(message) => Toast::new("❌ Error", message),
            ToastKind::Disabled => Toast::new("🔕 Disabled", "Meal reminders turned off"),
            ToastKind::PermissionIssue => Toast::new(
                "⚠ Permission Issue",
                "Browser has not granted notification access.",
            ),
            ToastKind::TestSent => Toast::new(
                "✅ Signal Sent",
                "Server processed the request. Watch for \"Verification: Server\".",
            ),
            ToastKind::TestFailed(message) => Toast::new("❌ Server Error", message),
            ToastKind::Foreground { title, body } => {
                let title = title.strip_prefix(MEAL_PREFIX).unwrap_or(title);
                Toast::new(format!("🔔 {title}"), body)
            },
        }
    }
}

/// Notification part of an incoming push message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
}

/// Message delivered by the SDK while the page is focused
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub notification: Option<PushPayload>,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl PushMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            notification: Some(PushPayload {
                title: Some(title.into()),
                body: Some(body.into()),
            }),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.notification
            .as_ref()
            .and_then(|n| n.title.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn body(&self) -> Option<&str> {
        self.notification
            .as_ref()
            .and_then(|n| n.body.as_deref())
            .filter(|b| !b.is_empty())
    }
}

/// Action button on a native notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionButton {
    pub action: String,
    pub title: String,
}

impl ActionButton {
    pub fn new(action: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            title: title.into(),
        }
    }
}

/// Native-style notification, serialized in the shape the worker's
/// `showNotification(title, options)` expects for its options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeNotification {
    #[serde(skip)]
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: Option<String>,
    pub vibrate: Vec<u32>,
    pub require_interaction: bool,
    pub dir: String,
    pub lang: String,
    /// Uniqueness tag; equal tags replace each other
    pub tag: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub actions: Vec<ActionButton>,
    pub data: HashMap<String, String>,
}

impl NativeNotification {
    /// Build the payload for a foreground message. The tag is derived from
    /// `now` so consecutive messages do not overwrite each other.
    pub fn foreground(config: &ManagerConfig, message: &PushMessage, now: DateTime<Utc>) -> Self {
        let timestamp = now.timestamp_millis();
        Self {
            title: message.title().unwrap_or(&config.default_title).to_string(),
            body: message.body().unwrap_or(&config.default_body).to_string(),
            icon: config.icon_path.clone(),
            badge: Some(config.badge_path.clone()),
            vibrate: config.foreground_vibration.clone(),
            require_interaction: true,
            dir: "auto".to_string(),
            lang: config.locale.clone(),
            tag: format!("{}{}", config.tag_prefix, timestamp),
            timestamp,
            actions: vec![
                ActionButton::new("view", "View Plan"),
                ActionButton::new("close", "Close"),
            ],
            data: message.data.clone(),
        }
    }

    /// Local "device is ready" notification shown by `send_test`
    pub fn local_verification(config: &ManagerConfig, now: DateTime<Utc>) -> Self {
        let timestamp = now.timestamp_millis();
        Self {
            title: "🔔 Verified: Mobile Ready".to_string(),
            body: format!(
                "Your device is ready to receive alerts. (Local Test: {})",
                now.format("%H:%M:%S")
            ),
            icon: config.icon_path.clone(),
            badge: None,
            vibrate: vec![100, 50, 100],
            require_interaction: false,
            dir: "auto".to_string(),
            lang: config.locale.clone(),
            tag: format!("local-verify-{timestamp}"),
            timestamp,
            actions: Vec::new(),
            data: HashMap::new(),
        }
    }
}

/// Presentation layer the manager drives: toasts plus the confirmation modal
/// shown during the enable flow
pub trait NotificationSurface: Send + Sync {
    fn show_toast(&self, toast: Toast);

    /// Show the confirmation modal; resolves to whether the user accepted
    fn confirm_enable(&self) -> BoxFuture<'_, bool>;

    /// Progress line inside the open modal
    fn show_progress(&self, stage: EnableStage);

    /// Switch the open modal to its success state
    fn show_enabled(&self, scheduled_meals: u32);

    fn close_modal(&self);
}
